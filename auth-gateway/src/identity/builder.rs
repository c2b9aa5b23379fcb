use super::{claim_types, Identity};
use crate::models::UserIdentity;

/// Map a stored user onto a canonical claim set.
///
/// Every scalar field produces exactly one claim; absent values become empty
/// strings so the claim set has the same shape for every user. Roles produce
/// one role claim and one group-sid claim each. The auth client id is left
/// empty for the grant processor to fill in.
pub fn build_identity(
    user: &UserIdentity,
    authentication_type: &str,
    impersonating_user_id: Option<i64>,
) -> Identity {
    let mut identity = Identity::new(authentication_type);

    identity.add_claim(claim_types::NAME, user.username.as_str());
    identity.add_claim(claim_types::USER_ID, user.user_id.to_string());
    identity.add_claim(claim_types::SECURITY_ID, user.security_id.to_string());

    for role in &user.roles {
        identity.add_claim(claim_types::GROUP_SID, role.security_id.to_string());
        identity.add_claim(claim_types::ROLE, role.name.as_str());
    }

    identity.add_claim(
        claim_types::AUTH_TOKEN_ID,
        user.auth_token_id.map(|id| id.to_string()).unwrap_or_default(),
    );
    identity.add_claim(claim_types::AUTH_CLIENT_ID, "");
    identity.add_claim(
        claim_types::PASSWORD_TIMESTAMP,
        user.password_timestamp.to_string(),
    );
    identity.add_claim(claim_types::FULL_NAME, user.full_name.as_str());
    identity.add_claim(
        claim_types::IMPERSONATING_USER_ID,
        impersonating_user_id
            .map(|id| id.to_string())
            .unwrap_or_default(),
    );
    identity.add_claim(claim_types::CULTURE, user.culture.as_str());

    identity
}
