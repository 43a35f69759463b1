use serde_json::{Value, json};
use uuid::Uuid;

use super::{emit, ensure_distinct, filter_ids, load_branch, load_org, load_project, required};
use crate::error::{Error, Result};
use crate::id;
use crate::permissions::{self, WebhookScope};
use crate::server::AppState;
use crate::server::dto::WebhookRequest;
use crate::store::Store;
use crate::types::{Metadata, Org, Project, User, Webhook, WebhookType};
use crate::validators::{
    ensure_unchanged, validate_custom, validate_name, validate_token_location, validate_triggers,
    validate_url, validate_webhook_id,
};
use crate::webhooks::{decode_trigger_id, hash_token, value_at};

/// Records that govern a webhook's reference.
enum Scope {
    Server,
    Org(Org),
    Project(Org, Project),
}

impl Scope {
    fn resolve(store: &dyn Store, reference: &str) -> Result<Self> {
        if reference.is_empty() {
            return Ok(Scope::Server);
        }
        match id::parse_id(reference).as_slice() {
            [org] => Ok(Scope::Org(load_org(store, org)?)),
            [org, project] => {
                let (org, project) = load_project(store, org, project)?;
                Ok(Scope::Project(org, project))
            }
            [org, project, branch] => {
                let (org, project, _) = load_branch(store, org, project, branch)?;
                Ok(Scope::Project(org, project))
            }
            _ => Err(Error::validation(
                "reference",
                format!("[{reference}] is not an org, project or branch id"),
            )),
        }
    }

    fn as_permission_scope(&self) -> WebhookScope<'_> {
        match self {
            Scope::Server => WebhookScope::Server,
            Scope::Org(org) => WebhookScope::Org(org),
            Scope::Project(org, project) => WebhookScope::Project(org, project),
        }
    }
}

fn check_fields(input: &WebhookRequest) -> Result<()> {
    if let Some(name) = &input.name {
        validate_name("name", name)?;
    }
    if let Some(triggers) = &input.triggers {
        validate_triggers(triggers)?;
    }
    if let Some(url) = &input.url {
        validate_url(url)?;
    }
    if let Some(location) = &input.token_location {
        validate_token_location(location)?;
    }
    if input.token.as_deref().is_some_and(str::is_empty) {
        return Err(Error::validation("token", "cannot be empty"));
    }
    if let Some(custom) = &input.custom {
        validate_custom(custom)?;
    }
    Ok(())
}

/// Rejects fields that belong to the other webhook type.
fn check_type_fields(webhook_type: WebhookType, input: &WebhookRequest) -> Result<()> {
    match webhook_type {
        WebhookType::Outgoing if input.token.is_some() || input.token_location.is_some() => {
            Err(Error::validation("token", "only applies to incoming webhooks"))
        }
        WebhookType::Incoming if input.url.is_some() => {
            Err(Error::validation("url", "only applies to outgoing webhooks"))
        }
        _ => Ok(()),
    }
}

fn load_webhook(store: &dyn Store, id: &str) -> Result<Webhook> {
    store
        .get_webhook(id)?
        .ok_or_else(|| Error::not_found(format!("Webhook [{id}]")))
}

pub fn create_webhooks(
    state: &AppState,
    user: &User,
    inputs: Vec<WebhookRequest>,
) -> Result<Vec<Webhook>> {
    let store = state.store.as_ref();

    for input in &inputs {
        let scope = Scope::resolve(store, input.reference.as_deref().unwrap_or_default())?;
        permissions::create_webhook(user, scope.as_permission_scope())?;
        check_fields(input)?;
        if input.triggers.is_none() {
            return Err(Error::validation("triggers", "is required"));
        }
        let webhook_type = input.webhook_type.unwrap_or(WebhookType::Outgoing);
        check_type_fields(webhook_type, input)?;
        match webhook_type {
            WebhookType::Outgoing => {
                required(input.url.as_deref(), "url")?;
            }
            WebhookType::Incoming => {
                required(input.token.as_deref(), "token")?;
                required(input.token_location.as_deref(), "token_location")?;
            }
        }
        if let Some(id) = &input.id {
            validate_webhook_id(id)?;
            if store.get_webhook(id)?.is_some() {
                return Err(Error::AlreadyExists(format!("Webhook [{id}]")));
            }
        }
    }
    ensure_distinct(inputs.iter().filter_map(|i| i.id.as_deref()), "Webhook")?;

    let mut created = Vec::with_capacity(inputs.len());
    for input in inputs {
        let webhook_type = input.webhook_type.unwrap_or(WebhookType::Outgoing);
        let id = input.id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let (url, token_hash, token_location) = match webhook_type {
            WebhookType::Outgoing => (input.url, None, None),
            WebhookType::Incoming => (
                None,
                input.token.as_deref().map(hash_token),
                input.token_location,
            ),
        };
        let webhook = Webhook {
            name: input.name.unwrap_or_else(|| id.clone()),
            id,
            webhook_type,
            reference: input.reference.unwrap_or_default(),
            triggers: input.triggers.unwrap_or_default(),
            url,
            token_hash,
            token_location,
            custom: input.custom.unwrap_or_else(|| json!({})),
            meta: Metadata::new(Some(&user.username)),
        };
        store.create_webhook(&webhook)?;
        tracing::info!(webhook = %webhook.id, kind = webhook.webhook_type.as_str(), reference = %webhook.reference, "created webhook");
        emit(state, "webhooks-created", &webhook.reference, &webhook);
        created.push(webhook);
    }
    Ok(created)
}

/// Lists the webhooks `user` can read.
pub fn find_webhooks(
    state: &AppState,
    user: &User,
    ids: Option<&[String]>,
    include_archived: bool,
) -> Result<Vec<Webhook>> {
    let store = state.store.as_ref();
    let mut visible = Vec::new();
    for hook in store.list_webhooks(include_archived)? {
        let readable = user.admin
            || Scope::resolve(store, &hook.reference)
                .is_ok_and(|scope| permissions::read_webhook(user, scope.as_permission_scope()).is_ok());
        if readable {
            visible.push(hook);
        }
    }
    Ok(filter_ids(visible, ids, |h| &h.id))
}

pub fn find_webhook(state: &AppState, user: &User, id: &str, include_archived: bool) -> Result<Webhook> {
    let store = state.store.as_ref();
    let hook = load_webhook(store, id)?;
    let scope = Scope::resolve(store, &hook.reference)?;
    permissions::read_webhook(user, scope.as_permission_scope())?;
    if hook.meta.archived && !include_archived {
        return Err(Error::not_found(format!("Webhook [{id}]")));
    }
    Ok(hook)
}

pub fn update_webhooks(
    state: &AppState,
    user: &User,
    inputs: Vec<WebhookRequest>,
) -> Result<Vec<Webhook>> {
    let store = state.store.as_ref();
    ensure_distinct(inputs.iter().filter_map(|i| i.id.as_deref()), "Webhook")?;

    let mut hooks = Vec::with_capacity(inputs.len());
    for input in &inputs {
        let id = required(input.id.as_deref(), "webhook id")?;
        let hook = load_webhook(store, id)?;
        let scope = Scope::resolve(store, &hook.reference)?;
        permissions::update_webhook(user, scope.as_permission_scope())?;
        ensure_unchanged(
            "Webhook",
            "type",
            hook.webhook_type.as_str(),
            input.webhook_type.map(WebhookType::as_str),
        )?;
        ensure_unchanged("Webhook", "reference", hook.reference.as_str(), input.reference.as_deref())?;
        check_fields(input)?;
        check_type_fields(hook.webhook_type, input)?;
        hooks.push(hook);
    }

    let mut updated = Vec::with_capacity(hooks.len());
    for (input, mut hook) in inputs.into_iter().zip(hooks) {
        if let Some(name) = input.name {
            hook.name = name;
        }
        if let Some(triggers) = input.triggers {
            hook.triggers = triggers;
        }
        if let Some(url) = input.url {
            hook.url = Some(url);
        }
        if let Some(token) = input.token {
            hook.token_hash = Some(hash_token(&token));
        }
        if let Some(location) = input.token_location {
            hook.token_location = Some(location);
        }
        if let Some(custom) = input.custom {
            hook.custom = custom;
        }
        if let Some(archived) = input.archived {
            hook.meta.set_archived(archived, &user.username);
        }
        hook.meta.touch(&user.username);
        store.update_webhook(&hook)?;
        emit(state, "webhooks-updated", &hook.reference, &hook);
        updated.push(hook);
    }
    Ok(updated)
}

pub fn update_webhook(state: &AppState, user: &User, id: &str, mut input: WebhookRequest) -> Result<Webhook> {
    ensure_unchanged("Webhook", "id", id, input.id.as_deref())?;
    input.id = Some(id.to_string());
    let mut updated = update_webhooks(state, user, vec![input])?;
    updated
        .pop()
        .ok_or_else(|| Error::not_found(format!("Webhook [{id}]")))
}

pub fn delete_webhooks(state: &AppState, user: &User, ids: &[String]) -> Result<Vec<String>> {
    let store = state.store.as_ref();
    let mut references = Vec::with_capacity(ids.len());
    for id in ids {
        let hook = load_webhook(store, id)?;
        let scope = Scope::resolve(store, &hook.reference)?;
        permissions::delete_webhook(user, scope.as_permission_scope())?;
        references.push(hook.reference);
    }

    let mut deleted = Vec::with_capacity(ids.len());
    for (id, reference) in ids.iter().zip(references) {
        if store.delete_webhook(id)? {
            emit(state, "webhooks-deleted", &reference, &json!({ "id": id }));
            deleted.push(id.clone());
        }
    }
    Ok(deleted)
}

/// Fires an incoming webhook. The token found in `body` at the hook's
/// `token_location` must hash to the stored digest. Each of the hook's
/// triggers is emitted in its reference scope with `body` as the payload.
pub fn trigger_webhook(state: &AppState, encoded_id: &str, body: Value) -> Result<Webhook> {
    let id = decode_trigger_id(encoded_id)?;
    let hook = state
        .store
        .get_webhook(&id)?
        .filter(|h| h.webhook_type == WebhookType::Incoming && !h.meta.archived)
        .ok_or_else(|| Error::not_found(format!("Webhook [{id}]")))?;

    let location = hook.token_location.as_deref().unwrap_or_default();
    let token = value_at(&body, location)
        .and_then(Value::as_str)
        .ok_or(Error::Unauthorized)?;
    if hook.token_hash.as_deref() != Some(hash_token(token).as_str()) {
        tracing::warn!(webhook = %hook.id, "Rejected incoming webhook with invalid token");
        return Err(Error::Unauthorized);
    }

    for trigger in &hook.triggers {
        emit(state, trigger, &hook.reference, &body);
    }
    tracing::info!(webhook = %hook.id, triggers = hook.triggers.len(), "triggered incoming webhook");
    Ok(hook)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controllers::orgs::create_orgs;
    use crate::controllers::testing::Fixture;
    use crate::server::dto::OrgRequest;
    use crate::types::PermissionChange;
    use crate::webhooks::encode_trigger_id;

    fn outgoing(reference: &str) -> WebhookRequest {
        WebhookRequest {
            name: Some("notify".to_string()),
            reference: Some(reference.to_string()),
            triggers: Some(vec!["elements-created".to_string()]),
            url: Some("http://localhost:9999/hook".to_string()),
            ..Default::default()
        }
    }

    fn incoming() -> WebhookRequest {
        WebhookRequest {
            webhook_type: Some(WebhookType::Incoming),
            reference: Some("acme".to_string()),
            triggers: Some(vec!["build-finished".to_string()]),
            token: Some("s3cret".to_string()),
            token_location: Some("auth.token".to_string()),
            ..Default::default()
        }
    }

    fn setup() -> (Fixture, User) {
        let fx = Fixture::new();
        let alice = fx.add_user("alice");
        create_orgs(
            &fx.state,
            &fx.admin,
            vec![OrgRequest {
                id: Some("acme".to_string()),
                permissions: Some([("alice".to_string(), PermissionChange::Read)].into()),
                ..Default::default()
            }],
        )
        .unwrap();
        (fx, alice)
    }

    #[test]
    fn test_create_webhooks() {
        let (fx, alice) = setup();
        let hook = create_webhooks(&fx.state, &fx.admin, vec![outgoing("acme")])
            .unwrap()
            .remove(0);
        assert!(Uuid::parse_str(&hook.id).is_ok());
        assert_eq!(hook.webhook_type, WebhookType::Outgoing);

        assert!(matches!(
            create_webhooks(&fx.state, &alice, vec![outgoing("acme")]),
            Err(Error::Permission(_))
        ));
        assert!(matches!(
            create_webhooks(&fx.state, &fx.admin, vec![outgoing("missing")]),
            Err(Error::NotFound(_))
        ));

        let mut no_url = outgoing("");
        no_url.url = None;
        assert!(matches!(
            create_webhooks(&fx.state, &fx.admin, vec![no_url]),
            Err(Error::Validation { .. })
        ));

        let stored = create_webhooks(&fx.state, &fx.admin, vec![incoming()])
            .unwrap()
            .remove(0);
        assert_eq!(stored.token_hash.as_deref(), Some(hash_token("s3cret").as_str()));
        assert!(stored.url.is_none());
    }

    #[test]
    fn test_create_webhooks_rejects_mismatched_fields() {
        let (fx, _) = setup();

        let mut with_token = outgoing("acme");
        with_token.token = Some("s3cret".to_string());
        assert!(matches!(
            create_webhooks(&fx.state, &fx.admin, vec![with_token]),
            Err(Error::Validation { .. })
        ));

        let mut with_url = incoming();
        with_url.url = Some("http://localhost:9999/hook".to_string());
        assert!(matches!(
            create_webhooks(&fx.state, &fx.admin, vec![with_url]),
            Err(Error::Validation { .. })
        ));

        let mut bad_id = outgoing("acme");
        bad_id.id = Some("not a valid:id".to_string());
        assert!(matches!(
            create_webhooks(&fx.state, &fx.admin, vec![bad_id]),
            Err(Error::Validation { .. })
        ));

        let mut named = outgoing("acme");
        named.id = Some("ci-notify".to_string());
        let hook = create_webhooks(&fx.state, &fx.admin, vec![named]).unwrap().remove(0);
        assert_eq!(hook.id, "ci-notify");
        assert_eq!(find_webhooks(&fx.state, &fx.admin, None, false).unwrap().len(), 1);
    }

    #[test]
    fn test_find_webhooks_by_scope() {
        let (fx, alice) = setup();
        create_webhooks(&fx.state, &fx.admin, vec![outgoing("acme"), outgoing("")]).unwrap();

        let visible = find_webhooks(&fx.state, &alice, None, false).unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].reference, "acme");
        assert_eq!(find_webhooks(&fx.state, &fx.admin, None, false).unwrap().len(), 2);
    }

    #[test]
    fn test_update_webhook_immutable_fields() {
        let (fx, _) = setup();
        let hook = create_webhooks(&fx.state, &fx.admin, vec![outgoing("acme")])
            .unwrap()
            .remove(0);

        let change_type = WebhookRequest {
            webhook_type: Some(WebhookType::Incoming),
            ..Default::default()
        };
        assert!(matches!(
            update_webhook(&fx.state, &fx.admin, &hook.id, change_type),
            Err(Error::Validation { .. })
        ));
        let move_scope = WebhookRequest {
            reference: Some(String::new()),
            ..Default::default()
        };
        assert!(update_webhook(&fx.state, &fx.admin, &hook.id, move_scope).is_err());
        assert_eq!(fx.store().get_webhook(&hook.id).unwrap().unwrap().reference, "acme");

        let rename = WebhookRequest {
            name: Some("renamed".to_string()),
            ..Default::default()
        };
        assert_eq!(
            update_webhook(&fx.state, &fx.admin, &hook.id, rename).unwrap().name,
            "renamed"
        );
    }

    #[test]
    fn test_trigger_webhook_checks_token() {
        let (fx, _) = setup();
        let hook = create_webhooks(&fx.state, &fx.admin, vec![incoming()])
            .unwrap()
            .remove(0);
        let encoded = encode_trigger_id(&hook.id);

        let wrong = json!({ "auth": { "token": "guess" } });
        assert!(matches!(
            trigger_webhook(&fx.state, &encoded, wrong),
            Err(Error::Unauthorized)
        ));
        assert!(matches!(
            trigger_webhook(&fx.state, &encoded, json!({})),
            Err(Error::Unauthorized)
        ));
        assert!(matches!(
            trigger_webhook(&fx.state, "!!", json!({})),
            Err(Error::BadRequest(_))
        ));

        let right = json!({ "auth": { "token": "s3cret" }, "build": 42 });
        assert_eq!(trigger_webhook(&fx.state, &encoded, right).unwrap().id, hook.id);
    }

    #[test]
    fn test_delete_webhooks() {
        let (fx, alice) = setup();
        let hook = create_webhooks(&fx.state, &fx.admin, vec![outgoing("acme")])
            .unwrap()
            .remove(0);
        assert!(delete_webhooks(&fx.state, &alice, &[hook.id.clone()]).is_err());
        assert_eq!(
            delete_webhooks(&fx.state, &fx.admin, &[hook.id.clone()]).unwrap(),
            vec![hook.id]
        );
    }
}
