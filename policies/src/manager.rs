use chrono::{DateTime, Utc};
use gpo_entry::{Domain, Gpo};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::appliers::{
    Applier, ApplierRegistry, BuiltinCompiler, DbCompiler, DconfApplier, DconfCompiler,
    PolicyKitApplier, PrivilegeApplier,
};
use crate::cache::{CacheEntry, RuleCache};
use crate::config::{CompilerKind, ManagerConfig};
use crate::context::Context;
use crate::diff::diff;
use crate::dump::{self, DumpOptions, Layer};
use crate::entitlement::{EntitlementGate, FileStatus, NoStatus, StatusProvider};
use crate::error::PolicyError;
use crate::resolver::{resolve, ResolvedRuleSet};
use crate::target::Target;

/// Steps of one apply, in order. `Failed` ends an apply early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyState {
    Idle,
    Resolving,
    Gating,
    Diffing,
    Applying(Domain),
    Persisting,
    Done,
    Failed,
}

impl fmt::Display for ApplyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplyState::Idle => f.write_str("idle"),
            ApplyState::Resolving => f.write_str("resolving"),
            ApplyState::Gating => f.write_str("gating"),
            ApplyState::Diffing => f.write_str("diffing"),
            ApplyState::Applying(domain) => write!(f, "applying {}", domain),
            ApplyState::Persisting => f.write_str("persisting"),
            ApplyState::Done => f.write_str("done"),
            ApplyState::Failed => f.write_str("failed"),
        }
    }
}

struct Transitions<'a> {
    target: &'a Target,
    state: ApplyState,
}

impl<'a> Transitions<'a> {
    fn new(target: &'a Target) -> Self {
        Self {
            target,
            state: ApplyState::Idle,
        }
    }

    fn to(&mut self, next: ApplyState) {
        debug!("Policy for {}: {} -> {}", self.target, self.state, next);
        self.state = next;
    }

    fn fail(&mut self, err: PolicyError) -> PolicyError {
        warn!("Policy for {} failed while {}: {}", self.target, self.state, err);
        self.state = ApplyState::Failed;
        err
    }
}

/// Entry point for resolving, applying and inspecting policies.
///
/// Different targets may be handled concurrently; applies to one target
/// must be serialized by the caller.
pub struct Manager {
    config: ManagerConfig,
    cache: RuleCache,
    gate: EntitlementGate,
    appliers: ApplierRegistry,
}

impl Manager {
    /// Builds the manager with the stock appliers for `config`.
    pub fn new(config: ManagerConfig, status: Arc<dyn StatusProvider>) -> Self {
        let compiler: Arc<dyn DbCompiler> = match config.dconf_compiler {
            CompilerKind::Dconf => Arc::new(DconfCompiler::default()),
            CompilerKind::Builtin => Arc::new(BuiltinCompiler),
        };

        let mut appliers = ApplierRegistry::new();
        appliers.register(Arc::new(
            DconfApplier::new(&config.dconf_dir, compiler)
                .with_cross_scope(config.cross_scope(Domain::Dconf)),
        ));
        appliers.register(Arc::new(PrivilegeApplier::new(&config.sudoers_dir)));
        appliers.register(Arc::new(PolicyKitApplier::new(&config.policykit_dir)));

        Self {
            cache: RuleCache::new(&config.cache_dir),
            gate: EntitlementGate::new(status),
            appliers,
            config,
        }
    }

    /// Uses the status file from the configuration, failing closed without one.
    pub fn from_config(config: ManagerConfig) -> Self {
        let status: Arc<dyn StatusProvider> = match &config.status_file {
            Some(path) => Arc::new(FileStatus::new(path)),
            None => Arc::new(NoStatus),
        };
        Self::new(config, status)
    }

    /// Replaces the applier of its domain.
    pub fn with_applier(mut self, applier: Arc<dyn Applier>) -> Self {
        self.appliers.register(applier);
        self
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn cache(&self) -> &RuleCache {
        &self.cache
    }

    pub fn hostname(&self) -> Result<String, PolicyError> {
        self.config.resolve_hostname()
    }

    /// Resolves `gpos` (highest precedence first), converges every backend
    /// and records the result as the new applied state of `target`.
    ///
    /// Backends run in domain order and the first failure stops the apply.
    /// Backends already converged are left as they are and the cache keeps
    /// the previous state, so the next apply retries from there.
    #[instrument(skip(self, ctx, target, gpos), fields(policy_target = %target, gpos = gpos.len()))]
    pub fn apply_policy(
        &self,
        ctx: &Context,
        target: &str,
        is_machine: bool,
        gpos: &[Gpo],
    ) -> Result<(), PolicyError> {
        let target = Target::new(target, is_machine)?;
        let mut states = Transitions::new(&target);

        states.to(ApplyState::Resolving);
        let mut rules = resolve(target.name(), is_machine, gpos);

        states.to(ApplyState::Gating);
        self.gate.refresh(ctx)?;
        if self.gate.filter(&mut rules) {
            debug!("Not entitled, dropping gated domains for {}", target);
        }

        states.to(ApplyState::Diffing);
        let previous = self.previous_rules(target.name())?;
        let changes = diff(previous.as_ref(), &rules);

        for domain_changes in &changes {
            ctx.check()?;
            let domain = domain_changes.domain;
            let Some(applier) = self.appliers.get(domain) else {
                if !domain_changes.is_noop() {
                    warn!("No backend registered for {}, skipping its rules", domain);
                }
                continue;
            };

            states.to(ApplyState::Applying(domain));
            applier.apply(&target, domain_changes).map_err(|e| {
                states.fail(PolicyError::Apply {
                    domain,
                    target: target.name().to_string(),
                    source: Box::new(e),
                })
            })?;
        }

        states.to(ApplyState::Persisting);
        let entry = CacheEntry {
            rules,
            gpos: gpos.to_vec(),
        };
        self.cache.store(target.name(), &entry).map_err(|e| {
            states.fail(PolicyError::Persist {
                target: target.name().to_string(),
                source: Box::new(e),
            })
        })?;

        states.to(ApplyState::Done);
        info!("Policy applied for {}", target);
        Ok(())
    }

    fn previous_rules(&self, target: &str) -> Result<Option<ResolvedRuleSet>, PolicyError> {
        match self.cache.load(target) {
            Ok(entry) => Ok(Some(entry.rules)),
            Err(e) if e.is_absent() => Ok(None),
            Err(PolicyError::Serialization { what, message }) => {
                warn!("Ignoring unreadable {}: {}", what, message);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Renders the cached policy of `target`. A user target also shows the
    /// machine policy, which must have been applied first.
    #[instrument(skip(self, ctx, target), fields(policy_target = %target))]
    pub fn dump_policies(
        &self,
        ctx: &Context,
        target: &str,
        with_rules: bool,
        with_overridden: bool,
    ) -> Result<String, PolicyError> {
        ctx.check()?;
        let hostname = self.hostname()?;
        let opts = DumpOptions {
            with_rules,
            with_overridden,
        };
        // Gating is only hidden when the overridden view is not requested.
        let hide_gated = !with_overridden && !self.gate.current_status();

        let mut machine = Layer::new(&self.cached_resolution(&hostname, true, hide_gated)?);
        if target == hostname {
            return Ok(dump::render(&[machine], opts));
        }

        ctx.check()?;
        let mut user = Layer::new(&self.cached_resolution(target, false, hide_gated)?);
        dump::layer_scopes(&mut machine, &mut user, |d| self.config.cross_scope(d));
        Ok(dump::render(&[machine, user], opts))
    }

    fn cached_resolution(
        &self,
        target: &str,
        is_machine: bool,
        hide_gated: bool,
    ) -> Result<ResolvedRuleSet, PolicyError> {
        let entry = self.cache.load(target)?;
        let mut set = resolve(target, is_machine, &entry.gpos);
        if hide_gated {
            set.strip_gated();
        }
        Ok(set)
    }

    /// Time of the last successful apply. Machine requests always refer to
    /// this host, whatever `target` says.
    #[instrument(skip(self, ctx, target), fields(policy_target = %target))]
    pub fn last_update_for(
        &self,
        ctx: &Context,
        target: &str,
        is_machine: bool,
    ) -> Result<DateTime<Utc>, PolicyError> {
        ctx.check()?;
        let name = if is_machine {
            self.hostname()?
        } else {
            target.to_string()
        };
        self.cache.last_modified(&name)
    }

    /// Last known entitlement, without querying the provider.
    pub fn status(&self) -> bool {
        self.gate.current_status()
    }

    #[instrument(skip(self, ctx))]
    pub fn refresh_status(&self, ctx: &Context) -> Result<bool, PolicyError> {
        self.gate.refresh(ctx)
    }

    pub fn last_status_refresh(&self) -> Option<DateTime<Utc>> {
        self.gate.last_refresh()
    }
}
