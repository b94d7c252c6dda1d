//! Authentication components for Hearthside

pub mod codes;
#[cfg(test)]
mod edge_case_tests;
pub mod jwt;
pub mod lifecycle;
pub mod middleware;
pub mod recovery_codes;
pub mod sessions;
pub mod tokens;
pub mod verification;

pub use codes::{
    generate_opaque_token, generate_recovery_code, generate_verification_code, hash_recovery_code,
    hash_token, recovery_code_hint, verify_recovery_code, GeneratedToken,
};
pub use jwt::{Claims, IssuedToken, JwtManager, TokenType};
pub use lifecycle::{LifecycleHandle, SessionEvent, SessionLifecycle, SessionSchedule};
pub use middleware::{require_auth, AuthState, AuthUser};
pub use sessions::SessionPayload;
pub use tokens::{AuthTokenRow, TokenKind};
pub use verification::{VerificationRow, VerificationType};
