use std::sync::Arc;

use axum::{routing::get, Json, Router};
use serde_json::{json, Value};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

use crate::authz::{Action, DenialDialog, Module, PermissionKey, Role};
use crate::models;
use crate::routes;

struct BearerAuth;

impl Modify for BearerAuth {
	fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
		let components = openapi.components.get_or_insert_with(Default::default);
		components.add_security_scheme(
			"bearerAuth",
			SecurityScheme::Http(
				HttpBuilder::new()
					.scheme(HttpAuthScheme::Bearer)
					.bearer_format("JWT")
					.build(),
			),
		);
	}
}

#[derive(OpenApi)]
#[openapi(
	paths(
		routes::health::health,
		routes::auth::register,
		routes::auth::login,
		routes::auth::me,
		routes::auth::logout,
		routes::permissions::catalog,
		routes::permissions::my_permissions,
		routes::permissions::check_permission,
		routes::permissions::refresh_permissions,
		routes::rbac::get_role_permissions,
		routes::rbac::replace_role_permissions,
		routes::rbac::get_user_overrides,
		routes::rbac::replace_user_overrides,
		routes::rbac::clear_user_overrides,
		routes::rbac::update_user_role,
		routes::rbac::get_effective_permissions
	),
	components(
		schemas(
			Module,
			Action,
			Role,
			PermissionKey,
			DenialDialog,
			routes::health::HealthResponse,
			routes::auth::MessageResponse,
			models::user::User,
			models::user::AuthResponse,
			models::user::LoginRequest,
			models::user::RegisterRequest,
			models::user::UpdateRoleRequest,
			models::rbac::ModuleInfo,
			models::rbac::ActionInfo,
			models::rbac::RoleInfo,
			models::rbac::PermissionCatalog,
			models::rbac::RoleGrants,
			models::rbac::ReplaceRoleGrantsRequest,
			models::rbac::OverrideEntry,
			models::rbac::UserOverrides,
			models::rbac::ReplaceOverridesRequest,
			models::rbac::ResolvedPermissions,
			models::rbac::PermissionCheckResponse,
			models::rbac::PermissionSource,
			models::rbac::EffectivePermission,
			models::rbac::EffectivePermissions
		)
	),
	modifiers(&BearerAuth),
	tags(
		(name = "Health", description = "Liveness and database check"),
		(name = "Auth", description = "Authentication endpoints"),
		(name = "Permissions", description = "Permissions of the calling user"),
		(name = "RBAC", description = "Role defaults, user overrides and role assignment")
	)
)]
pub struct ApiDoc;

/// OpenAPI document as JSON, with a `servers` entry for the local port
pub fn build_openapi(port: u16) -> anyhow::Result<Value> {
	let mut doc = serde_json::to_value(ApiDoc::openapi())?;
	ensure_servers(&mut doc, port);
	Ok(doc)
}

pub fn swagger_routes(doc: Value) -> Router {
	let swagger_config = utoipa_swagger_ui::Config::new(["/api-docs/openapi.json"])
		.try_it_out_enabled(true)
		.with_credentials(true)
		.persist_authorization(true);

	let doc_json = Arc::new(doc);

	let json_route = {
		let doc_json = Arc::clone(&doc_json);
		get(move || {
			let doc_json = Arc::clone(&doc_json);
			async move { Json((*doc_json).clone()) }
		})
	};

	Router::new()
		.route("/api-docs/openapi.json", json_route)
		.merge(SwaggerUi::new("/docs").config(swagger_config))
}

fn ensure_servers(doc: &mut Value, port: u16) {
	let server_url = format!("http://localhost:{}", port);

	match doc.get_mut("servers") {
		Some(Value::Array(arr)) => {
			let has = arr.iter().any(|v| v.get("url").and_then(Value::as_str) == Some(server_url.as_str()));
			if !has {
				arr.push(json!({ "url": server_url }));
			}
		}
		_ => {
			doc["servers"] = json!([{ "url": server_url }]);
		}
	}
}
