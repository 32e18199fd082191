//! In-memory remote provider used by tests.
//!
//! Models one state machine, its role, account policies and log groups, with
//! per-method failure injection and a log of write calls.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{RemoteError, RemoteResult};
use crate::planner::DesiredIntent;

use super::api::RemoteResourceApi;
use super::types::{LoggingConfig, PolicyCreation, ResourceDescription, Subscription};

pub const SM_ARN: &str = "arn:aws:states:us-east-1:123456789012:stateMachine:orders";
pub const ROLE_ARN: &str = "arn:aws:iam::123456789012:role/service-role/orders-role";
pub const ROLE_NAME: &str = "orders-role";
pub const FORWARDER: &str = "arn:aws:lambda:us-east-1:123456789012:function:log-forwarder";

#[derive(Debug, Default)]
struct World {
    exists: bool,
    logging: LoggingConfig,
    tags: BTreeMap<String, String>,
    attached: BTreeSet<String>,
    policies: BTreeMap<String, String>,
    log_groups: BTreeSet<String>,
    subscriptions: BTreeMap<(String, String), String>,
    failures: HashMap<&'static str, VecDeque<RemoteError>>,
    sticky_failures: HashMap<&'static str, RemoteError>,
    cancel_during: HashMap<&'static str, CancellationToken>,
    writes: Vec<String>,
}

#[derive(Debug)]
pub struct FakeRemote {
    world: Mutex<World>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self {
            world: Mutex::new(World {
                exists: true,
                ..World::default()
            }),
        }
    }

    /// Intent with logging on, the default forwarder and no tags.
    pub fn default_intent() -> DesiredIntent {
        DesiredIntent::for_state_machine(SM_ARN)
            .unwrap()
            .with_forwarder(Some(FORWARDER.to_string()))
    }

    fn world(&self) -> std::sync::MutexGuard<'_, World> {
        self.world.lock().unwrap()
    }

    pub fn set_logging(&self, logging: LoggingConfig) {
        let mut world = self.world();
        if let Some(group) = logging.destination.as_deref().and_then(group_of) {
            world.log_groups.insert(group);
        }
        world.logging = logging;
    }

    pub fn logging(&self) -> LoggingConfig {
        self.world().logging.clone()
    }

    pub fn set_tags(&self, tags: &[(&str, &str)]) {
        self.world().tags = tags
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
    }

    pub fn tags(&self) -> BTreeMap<String, String> {
        self.world().tags.clone()
    }

    pub fn create_existing_policy(&self, name: &str) {
        self.world()
            .policies
            .insert(name.to_string(), String::from("{}"));
    }

    pub fn has_policy(&self, name: &str) -> bool {
        self.world().policies.contains_key(name)
    }

    pub fn attach(&self, name: &str) {
        let mut world = self.world();
        world.policies.insert(name.to_string(), String::from("{}"));
        world.attached.insert(name.to_string());
    }

    pub fn attached(&self) -> BTreeSet<String> {
        self.world().attached.clone()
    }

    pub fn add_subscription(&self, group: &str, filter: &str, forwarder: &str) {
        let mut world = self.world();
        world.log_groups.insert(group.to_string());
        world
            .subscriptions
            .insert((group.to_string(), filter.to_string()), forwarder.to_string());
    }

    pub fn subscription(&self, group: &str, filter: &str) -> Option<String> {
        self.world()
            .subscriptions
            .get(&(group.to_string(), filter.to_string()))
            .cloned()
    }

    pub fn remove_state_machine(&self) {
        self.world().exists = false;
    }

    /// Makes the next call of `method` fail with `error`.
    pub fn fail_next(&self, method: &'static str, error: RemoteError) {
        self.world().failures.entry(method).or_default().push_back(error);
    }

    /// Makes every call of `method` fail with `error`.
    pub fn fail_always(&self, method: &'static str, error: RemoteError) {
        self.world().sticky_failures.insert(method, error);
    }

    /// Cancels `token` while the next call of `method` is in flight.
    pub fn cancel_during(&self, method: &'static str, token: CancellationToken) {
        self.world().cancel_during.insert(method, token);
    }

    /// Fires a pending `cancel_during` hook, then yields so a caller racing
    /// the call against the token would observe the cancellation first.
    async fn in_flight(&self, method: &'static str) {
        let token = self.world().cancel_during.remove(method);
        if let Some(token) = token {
            token.cancel();
            tokio::task::yield_now().await;
        }
    }

    /// Names of write calls in the order they were issued.
    pub fn writes(&self) -> Vec<String> {
        self.world().writes.clone()
    }

    fn enter(&self, method: &'static str, write: bool) -> RemoteResult<std::sync::MutexGuard<'_, World>> {
        let mut world = self.world();
        if write {
            world.writes.push(method.to_string());
        }
        if let Some(err) = world.sticky_failures.get(method) {
            return Err(err.clone());
        }
        if let Some(err) = world.failures.get_mut(method).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        Ok(world)
    }
}

fn group_of(destination: &str) -> Option<String> {
    crate::remote::Arn::parse(destination)
        .ok()
        .and_then(|a| a.log_group_name().map(String::from))
}

fn policy_name(policy_arn: &str) -> &str {
    policy_arn.rsplit('/').next().unwrap_or(policy_arn)
}

#[async_trait]
impl RemoteResourceApi for FakeRemote {
    async fn describe_resource(&self, arn: &str) -> RemoteResult<ResourceDescription> {
        let world = self.enter("describe_resource", false)?;
        if !world.exists || arn != SM_ARN {
            return Err(RemoteError::not_found(arn));
        }
        Ok(ResourceDescription {
            arn: SM_ARN.to_string(),
            name: String::from("orders"),
            role_arn: ROLE_ARN.to_string(),
            logging: world.logging.clone(),
        })
    }

    async fn list_tags(&self, _arn: &str) -> RemoteResult<BTreeMap<String, String>> {
        Ok(self.enter("list_tags", false)?.tags.clone())
    }

    async fn list_subscriptions(&self, log_group: &str) -> RemoteResult<Vec<Subscription>> {
        let world = self.enter("list_subscriptions", false)?;
        Ok(world
            .subscriptions
            .iter()
            .filter(|((group, _), _)| group == log_group)
            .map(|((group, filter), forwarder)| Subscription {
                log_group: group.clone(),
                filter_name: filter.clone(),
                forwarder_arn: forwarder.clone(),
            })
            .collect())
    }

    async fn list_attached_policies(&self, role_name: &str) -> RemoteResult<BTreeSet<String>> {
        let world = self.enter("list_attached_policies", false)?;
        if role_name != ROLE_NAME {
            return Err(RemoteError::not_found(role_name));
        }
        Ok(world.attached.clone())
    }

    async fn policy_exists(&self, policy_arn: &str) -> RemoteResult<bool> {
        let world = self.enter("policy_exists", false)?;
        Ok(world.policies.contains_key(policy_name(policy_arn)))
    }

    async fn update_logging_config(&self, _arn: &str, config: &LoggingConfig) -> RemoteResult<()> {
        {
            let mut world = self.enter("update_logging_config", true)?;
            if let Some(group) = config.destination.as_deref().and_then(group_of) {
                world.log_groups.insert(group);
            }
            world.logging = config.clone();
        }
        self.in_flight("update_logging_config").await;
        Ok(())
    }

    async fn create_policy(&self, name: &str, document: &str) -> RemoteResult<PolicyCreation> {
        let mut world = self.enter("create_policy", true)?;
        if world.policies.contains_key(name) {
            return Ok(PolicyCreation::AlreadyExists);
        }
        world.policies.insert(name.to_string(), document.to_string());
        Ok(PolicyCreation::Created)
    }

    async fn delete_policy(&self, policy_arn: &str) -> RemoteResult<()> {
        let mut world = self.enter("delete_policy", true)?;
        world
            .policies
            .remove(policy_name(policy_arn))
            .map(|_| ())
            .ok_or_else(|| RemoteError::not_found(policy_arn))
    }

    async fn attach_policy(&self, role_name: &str, policy_arn: &str) -> RemoteResult<()> {
        let mut world = self.enter("attach_policy", true)?;
        let name = policy_name(policy_arn).to_string();
        if role_name != ROLE_NAME || !world.policies.contains_key(&name) {
            return Err(RemoteError::not_found(policy_arn));
        }
        world.attached.insert(name);
        Ok(())
    }

    async fn detach_policy(&self, _role_name: &str, policy_arn: &str) -> RemoteResult<()> {
        let mut world = self.enter("detach_policy", true)?;
        if world.attached.remove(policy_name(policy_arn)) {
            Ok(())
        } else {
            Err(RemoteError::not_found(policy_arn))
        }
    }

    async fn put_subscription(
        &self,
        log_group: &str,
        filter_name: &str,
        forwarder_arn: &str,
    ) -> RemoteResult<()> {
        let mut world = self.enter("put_subscription", true)?;
        if !world.log_groups.contains(log_group) {
            return Err(RemoteError::not_found(log_group));
        }
        world.subscriptions.insert(
            (log_group.to_string(), filter_name.to_string()),
            forwarder_arn.to_string(),
        );
        Ok(())
    }

    async fn delete_subscription(&self, log_group: &str, filter_name: &str) -> RemoteResult<()> {
        let mut world = self.enter("delete_subscription", true)?;
        world
            .subscriptions
            .remove(&(log_group.to_string(), filter_name.to_string()))
            .map(|_| ())
            .ok_or_else(|| RemoteError::not_found(filter_name))
    }

    async fn tag_resource(&self, _arn: &str, tags: &BTreeMap<String, String>) -> RemoteResult<()> {
        let mut world = self.enter("tag_resource", true)?;
        world
            .tags
            .extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    async fn untag_resource(&self, _arn: &str, keys: &[String]) -> RemoteResult<()> {
        let mut world = self.enter("untag_resource", true)?;
        for key in keys {
            world.tags.remove(key);
        }
        Ok(())
    }
}
