pub mod audit;
pub mod key;
pub mod ledger;
pub mod oauth;
pub mod rbac;
pub mod token;

pub use audit::AuditEntry;
pub use key::{KeyStatus, SigningKey};
pub use ledger::{Account, Money, Transaction};
pub use oauth::{AuthCode, CodeChallengeMethod, OAuthClient};
pub use rbac::{Organization, Permission, Role, User, UserRoleAssignment, UserStatus};
pub use token::{AccessClaims, RefreshTokenRecord, TokenPair};
