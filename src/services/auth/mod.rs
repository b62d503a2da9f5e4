pub mod session_verifier;

pub use session_verifier::{
    CachedSessionVerifier, JwtSessionVerifier, RemoteSessionVerifier, SessionError, SessionVerifier,
    VerifiedSession,
};
