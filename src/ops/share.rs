//! Public share links for proposals and invoices.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;

use crate::auth::verify_password;
use crate::db::ProposalRecord;

pub const SHARE_TOKEN_BYTES: usize = 32;

/// Header carrying the password of a protected proposal.
pub const SHARE_PASSWORD_HEADER: &str = "x-share-password";

/// 32 random bytes, URL-safe base64 without padding.
pub fn new_share_token() -> String {
    let mut bytes = [0u8; SHARE_TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareAccess {
    Granted,
    PasswordRequired,
    WrongPassword,
}

pub async fn check_proposal_access(
    proposal: &ProposalRecord,
    supplied: Option<&str>,
) -> ShareAccess {
    let Some(hash) = proposal.password_hash.as_deref() else {
        return ShareAccess::Granted;
    };
    let Some(password) = supplied else {
        return ShareAccess::PasswordRequired;
    };
    if verify_password(password, hash).await {
        ShareAccess::Granted
    } else {
        ShareAccess::WrongPassword
    }
}
