//! Bearer token validation: hash the raw token, look up its owning client
//! and tenant, then load the scopes granted to that client (§3, §4.4.2).

use std::collections::HashSet;

use gateway_core::router::client::{Scope, ScopeResource};
use gateway_protocol::Capability;
use sha2::{Digest, Sha256};
use sqlx::{PgPool, Row};

pub struct ClientClaims {
    pub client_id: String,
    pub tenant_id: String,
    pub scopes: Vec<Scope>,
}

pub async fn validate_token(pool: &PgPool, raw_token: &str) -> Option<ClientClaims> {
    let hash = Sha256::digest(raw_token.as_bytes()).as_slice().to_vec();

    let token_row = sqlx::query(
        r#"SELECT client_id, tenant_id
           FROM client_tokens
           WHERE token_hash = $1
             AND revoked_at IS NULL"#,
    )
    .bind(&hash)
    .fetch_optional(pool)
    .await
    .ok()??;

    let client_id: String = token_row.try_get("client_id").ok()?;
    let tenant_id: String = token_row.try_get("tenant_id").ok()?;

    let scope_rows = sqlx::query(
        r#"SELECT tenant_id, resource_kind, resource_id, capabilities, farm_ids, site_ids, cage_ids
           FROM client_scopes
           WHERE client_id = $1"#,
    )
    .bind(&client_id)
    .fetch_all(pool)
    .await
    .ok()?;

    let scopes = scope_rows.into_iter().filter_map(row_to_scope).collect();

    Some(ClientClaims {
        client_id,
        tenant_id,
        scopes,
    })
}

fn row_to_scope(row: sqlx::postgres::PgRow) -> Option<Scope> {
    let tenant_id: String = row.try_get("tenant_id").ok()?;
    let resource_kind: String = row.try_get("resource_kind").ok()?;
    let resource_id: Option<String> = row.try_get("resource_id").ok()?;
    let capabilities: Vec<String> = row.try_get("capabilities").ok()?;
    let farm_ids: Option<Vec<String>> = row.try_get("farm_ids").ok()?;
    let site_ids: Option<Vec<String>> = row.try_get("site_ids").ok()?;
    let cage_ids: Option<Vec<String>> = row.try_get("cage_ids").ok()?;

    let resource = match resource_kind.as_str() {
        "any" => ScopeResource::Any,
        "farm" => ScopeResource::Farm(resource_id?),
        "site" => ScopeResource::Site(resource_id?),
        "cage" => ScopeResource::Cage(resource_id?),
        _ => return None,
    };

    Some(Scope {
        tenant_id,
        resource,
        permissions: capabilities.iter().filter_map(|c| parse_capability(c)).collect(),
        farm_ids: farm_ids.map(|ids| ids.into_iter().collect::<HashSet<_>>()),
        site_ids: site_ids.map(|ids| ids.into_iter().collect::<HashSet<_>>()),
        cage_ids: cage_ids.map(|ids| ids.into_iter().collect::<HashSet<_>>()),
    })
}

fn parse_capability(s: &str) -> Option<Capability> {
    match s {
        "feeding_read" => Some(Capability::FeedingRead),
        "biometric_read" => Some(Capability::BiometricRead),
        "climate_read" => Some(Capability::ClimateRead),
        "ops_read" => Some(Capability::OpsRead),
        _ => None,
    }
}

pub fn extract_bearer(authorization: &str) -> Option<&str> {
    authorization.strip_prefix("Bearer ")
}
