use once_cell::sync::Lazy;
use std::sync::Mutex;
use ulid::{Generator, Ulid};

static GENERATOR: Lazy<Mutex<Generator>> = Lazy::new(|| Mutex::new(Generator::new()));

/// Returns a lexicographically sortable identifier suitable for storage keys.
///
/// IDs generated within the same millisecond stay monotonic; on generator
/// overflow a fresh random ULID is used instead.
pub fn new_id() -> String {
    let mut generator = match GENERATOR.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    match generator.generate() {
        Ok(id) => id.to_string(),
        Err(_) => Ulid::new().to_string(),
    }
}
