//! The permission manager: policy, cache, prompter, and persistence tied
//! together behind the two calls host code uses.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};

use crate::cache::PromptCache;
use crate::config::{self, PermissionsFile};
use crate::kind::PermissionKind;
use crate::metrics::{
    METRIC_PERMISSION_KIND_LABEL, METRIC_PERMISSION_OUTCOME_LABEL, METRIC_PERMISSION_PROMPTS,
    METRIC_PERMISSION_QUERIES,
};
use crate::policy::{AllowList, PatternError, PolicySnapshot, canonical_path};
use crate::prompter::{PermissionDescriptor, Prompter};

/// The outcome of a policy query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The allow-list covers the resource.
    Granted,
    /// The allow-list does not cover the resource and no prompter is
    /// attached.
    Denied,
    /// The allow-list does not cover the resource; an attached prompter may
    /// still grant it interactively.
    Prompt,
}

/// Builds a [`PermissionManager`].
#[derive(Default)]
pub struct PermissionManagerBuilder {
    prompter: Option<Arc<dyn Prompter>>,
    config_path: Option<PathBuf>,
}

impl PermissionManagerBuilder {
    /// Attach an interactive prompter. Without one, every query that the
    /// policy does not grant is denied outright.
    pub fn with_prompter(mut self, prompter: Arc<dyn Prompter>) -> Self {
        self.prompter = Some(prompter);
        self
    }

    /// Remember where the config file lives, enabling persistence of
    /// remembered grants.
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Build the manager with all allow-lists absent.
    pub fn build(self) -> PermissionManager {
        PermissionManager {
            policy: RwLock::new(PolicySnapshot::default()),
            cache: PromptCache::default(),
            prompter: self.prompter,
            config_path: self.config_path,
            config_lock: Mutex::new(()),
        }
    }
}

/// The reference monitor every privileged host operation consults.
pub struct PermissionManager {
    policy: RwLock<PolicySnapshot>,
    cache: PromptCache,
    prompter: Option<Arc<dyn Prompter>>,
    config_path: Option<PathBuf>,
    /// Serializes read-modify-write cycles on the config file.
    config_lock: Mutex<()>,
}

impl PermissionManager {
    /// Start building a manager.
    pub fn builder() -> PermissionManagerBuilder {
        PermissionManagerBuilder::default()
    }

    /// Consult the policy snapshot for `(kind, resource)`.
    pub fn query(&self, kind: PermissionKind, resource: &str) -> Decision {
        let granted = self.policy.read().allows(kind, resource);
        let decision = if granted {
            Decision::Granted
        } else if self.prompter.is_some() {
            Decision::Prompt
        } else {
            Decision::Denied
        };
        let outcome = match decision {
            Decision::Granted => "granted",
            Decision::Denied => "denied",
            Decision::Prompt => "prompt",
        };
        metrics::counter!(
            METRIC_PERMISSION_QUERIES,
            METRIC_PERMISSION_KIND_LABEL => kind.as_str(),
            METRIC_PERMISSION_OUTCOME_LABEL => outcome
        )
        .increment(1);
        decision
    }

    /// Whether the policy grants `(kind, resource)` without user
    /// interaction.
    pub fn check(&self, kind: PermissionKind, resource: &str) -> bool {
        self.query(kind, resource) == Decision::Granted
    }

    /// Check `(kind, resource)`, falling back to the prompt cache and then
    /// the interactive prompter when the policy alone does not grant it.
    ///
    /// A response flagged persistent is cached, and a persistent grant is
    /// also appended to the config file when one is known; a persistence
    /// failure is logged and does not affect the grant. A prompt that times
    /// out against `deadline` (or cannot obtain an answer at all) denies.
    pub fn check_with_prompt(
        &self,
        kind: PermissionKind,
        resource: &str,
        deadline: Option<Instant>,
    ) -> bool {
        match self.query(kind, resource) {
            Decision::Granted => true,
            Decision::Denied => false,
            Decision::Prompt => self.prompt_for(kind, resource, deadline),
        }
    }

    fn prompt_for(&self, kind: PermissionKind, resource: &str, deadline: Option<Instant>) -> bool {
        let key = canonical_resource(kind, resource);
        if let Some(remembered) = self.cache.lookup(kind, &key) {
            return remembered;
        }
        let Some(prompter) = &self.prompter else {
            return false;
        };
        let descriptor = PermissionDescriptor {
            kind,
            resource: resource.to_string(),
        };
        let response = prompter.prompt(deadline, &descriptor);
        let outcome = if response.granted { "granted" } else { "denied" };
        metrics::counter!(
            METRIC_PERMISSION_PROMPTS,
            METRIC_PERMISSION_OUTCOME_LABEL => outcome
        )
        .increment(1);
        if response.persist {
            self.cache.record(kind, &key, response.granted);
            if response.granted {
                if let Err(err) = self.persist_grant(kind, resource) {
                    tracing::warn!(
                        %err,
                        kind = kind.as_str(),
                        resource,
                        "failed to persist permission grant; keeping the in-memory grant"
                    );
                }
            }
        }
        response.granted
    }

    /// The resources in `resource` (as written by the user) are persisted
    /// verbatim so the config keeps the spelling the script used.
    fn persist_grant(&self, kind: PermissionKind, resource: &str) -> Result<(), config::ConfigError> {
        let Some(path) = &self.config_path else {
            tracing::debug!(
                kind = kind.as_str(),
                resource,
                "no config path known; grant not persisted"
            );
            return Ok(());
        };
        let _serial = self.config_lock.lock();
        config::append_grant(path, kind, resource)
    }

    /// Replace the read allow-list. An empty slice allows all reads.
    pub fn grant_read(&self, patterns: &[String]) -> Result<(), PatternError> {
        self.grant(PermissionKind::Read, patterns)
    }

    /// Replace the write allow-list. An empty slice allows all writes.
    pub fn grant_write(&self, patterns: &[String]) -> Result<(), PatternError> {
        self.grant(PermissionKind::Write, patterns)
    }

    /// Replace the net allow-list. An empty slice allows all hosts.
    pub fn grant_net(&self, patterns: &[String]) -> Result<(), PatternError> {
        self.grant(PermissionKind::Net, patterns)
    }

    /// Replace the env allow-list. An empty slice allows all variables.
    pub fn grant_env(&self, patterns: &[String]) -> Result<(), PatternError> {
        self.grant(PermissionKind::Env, patterns)
    }

    /// Replace the run allow-list. An empty slice allows all programs.
    pub fn grant_run(&self, patterns: &[String]) -> Result<(), PatternError> {
        self.grant(PermissionKind::Run, patterns)
    }

    fn grant(&self, kind: PermissionKind, patterns: &[String]) -> Result<(), PatternError> {
        let mut policy = self.policy.write();
        match kind {
            PermissionKind::Read => policy.read = AllowList::granted(kind, patterns)?,
            PermissionKind::Write => policy.write = AllowList::granted(kind, patterns)?,
            PermissionKind::Net => policy.net = AllowList::granted(kind, patterns)?,
            PermissionKind::Env => policy.env = AllowList::granted(kind, patterns)?,
            PermissionKind::Run => policy.run = AllowList::granted(kind, patterns)?,
        }
        Ok(())
    }

    /// Apply a loaded config file: every present array becomes a grant.
    pub fn apply_config(&self, file: &PermissionsFile) -> Result<(), PatternError> {
        for kind in PermissionKind::ALL {
            if let Some(patterns) = file.permissions.kind(kind) {
                self.grant(kind, patterns)?;
            }
        }
        Ok(())
    }

    /// Load and apply the config at `path` if it exists. Returns whether a
    /// file was found.
    pub fn load_config(&self, path: &Path) -> Result<bool, anyhow::Error> {
        match config::load(path)? {
            Some(file) => {
                self.apply_config(&file)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Forget every remembered prompt decision.
    pub fn reset_prompt_cache(&self) {
        self.cache.reset();
    }

    /// Whether an interactive prompter is attached.
    pub fn interactive(&self) -> bool {
        self.prompter.is_some()
    }
}

/// The cache key for a resource: the canonical form matching uses, so two
/// spellings of one path share a remembered decision.
fn canonical_resource(kind: PermissionKind, resource: &str) -> String {
    match kind {
        PermissionKind::Read | PermissionKind::Write => {
            canonical_path(Path::new(resource)).display().to_string()
        }
        PermissionKind::Net | PermissionKind::Env | PermissionKind::Run => resource.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::config::CONFIG_FILE_NAME;
    use crate::prompter::PromptResponse;

    struct ScriptedPrompter {
        response: PromptResponse,
        calls: AtomicUsize,
    }

    impl ScriptedPrompter {
        fn new(granted: bool, persist: bool) -> Self {
            Self {
                response: PromptResponse { granted, persist },
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Prompter for ScriptedPrompter {
        fn prompt(
            &self,
            _deadline: Option<Instant>,
            _descriptor: &PermissionDescriptor,
        ) -> PromptResponse {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.response
        }
    }

    #[test]
    fn absent_lists_deny_without_a_prompter() {
        let manager = PermissionManager::builder().build();
        assert_eq!(manager.query(PermissionKind::Read, "/tmp/x"), Decision::Denied);
        assert!(!manager.check_with_prompt(PermissionKind::Read, "/tmp/x", None));
    }

    #[test]
    fn granted_patterns_resolve_without_prompting() {
        let prompter = Arc::new(ScriptedPrompter::new(true, false));
        let manager = PermissionManager::builder()
            .with_prompter(prompter.clone())
            .build();
        manager.grant_read(&["/tmp".to_string()]).unwrap();

        assert!(manager.check_with_prompt(PermissionKind::Read, "/tmp/x", None));
        assert_eq!(prompter.calls(), 0);
    }

    #[test]
    fn unmatched_queries_prompt_when_interactive() {
        let prompter = Arc::new(ScriptedPrompter::new(true, false));
        let manager = PermissionManager::builder()
            .with_prompter(prompter.clone())
            .build();

        assert_eq!(manager.query(PermissionKind::Net, "example.com"), Decision::Prompt);
        assert!(manager.check_with_prompt(PermissionKind::Net, "example.com", None));
        assert_eq!(prompter.calls(), 1);

        // Not persisted: the next check asks again.
        assert!(manager.check_with_prompt(PermissionKind::Net, "example.com", None));
        assert_eq!(prompter.calls(), 2);
    }

    #[test]
    fn persistent_answers_are_cached() {
        let prompter = Arc::new(ScriptedPrompter::new(true, true));
        let manager = PermissionManager::builder()
            .with_prompter(prompter.clone())
            .build();

        assert!(manager.check_with_prompt(PermissionKind::Env, "HOME", None));
        assert!(manager.check_with_prompt(PermissionKind::Env, "HOME", None));
        assert_eq!(prompter.calls(), 1);

        manager.reset_prompt_cache();
        assert!(manager.check_with_prompt(PermissionKind::Env, "HOME", None));
        assert_eq!(prompter.calls(), 2);
    }

    #[test]
    fn persistent_denials_are_cached_too() {
        let prompter = Arc::new(ScriptedPrompter::new(false, true));
        let manager = PermissionManager::builder()
            .with_prompter(prompter.clone())
            .build();

        assert!(!manager.check_with_prompt(PermissionKind::Run, "rm", None));
        assert!(!manager.check_with_prompt(PermissionKind::Run, "rm", None));
        assert_eq!(prompter.calls(), 1);
    }

    #[test]
    fn two_path_spellings_share_one_cached_decision() {
        let prompter = Arc::new(ScriptedPrompter::new(true, true));
        let manager = PermissionManager::builder()
            .with_prompter(prompter.clone())
            .build();

        assert!(manager.check_with_prompt(PermissionKind::Read, "/tmp/a/../data", None));
        assert!(manager.check_with_prompt(PermissionKind::Read, "/tmp/data", None));
        assert_eq!(prompter.calls(), 1);
    }

    #[test]
    fn persistent_grants_are_written_to_the_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let prompter = Arc::new(ScriptedPrompter::new(true, true));
        let manager = PermissionManager::builder()
            .with_prompter(prompter.clone())
            .with_config_path(&path)
            .build();

        assert!(manager.check_with_prompt(PermissionKind::Read, "./data/config.json", None));

        let file = config::load(&path).unwrap().unwrap();
        assert_eq!(
            file.permissions.read,
            Some(vec!["./data/config.json".to_string()])
        );

        // Repeats neither prompt again nor duplicate the entry.
        assert!(manager.check_with_prompt(PermissionKind::Read, "./data/config.json", None));
        let file = config::load(&path).unwrap().unwrap();
        assert_eq!(
            file.permissions.read,
            Some(vec!["./data/config.json".to_string()])
        );
        assert_eq!(prompter.calls(), 1);
    }

    #[test]
    fn persistence_failure_does_not_revert_the_grant() {
        let dir = tempfile::tempdir().unwrap();
        // A directory at the config path makes the write fail.
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::create_dir(&path).unwrap();
        let prompter = Arc::new(ScriptedPrompter::new(true, true));
        let manager = PermissionManager::builder()
            .with_prompter(prompter.clone())
            .with_config_path(&path)
            .build();

        assert!(manager.check_with_prompt(PermissionKind::Run, "git", None));
        // Still granted on the next call, via the cache.
        assert!(manager.check_with_prompt(PermissionKind::Run, "git", None));
        assert_eq!(prompter.calls(), 1);
    }

    #[test]
    fn config_round_trip_reproduces_the_policy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        config::append_grant(&path, PermissionKind::Read, "/tmp").unwrap();
        config::append_grant(&path, PermissionKind::Net, "localhost").unwrap();

        let manager = PermissionManager::builder().build();
        assert!(manager.load_config(&path).unwrap());

        assert_eq!(manager.query(PermissionKind::Read, "/tmp/x"), Decision::Granted);
        assert_eq!(
            manager.query(PermissionKind::Net, "127.0.0.1:9229"),
            Decision::Granted
        );
        assert_eq!(manager.query(PermissionKind::Write, "/tmp/x"), Decision::Denied);
    }

    #[test]
    fn empty_config_array_allows_the_whole_kind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, r#"{ "permissions": { "env": [] } }"#).unwrap();

        let manager = PermissionManager::builder().build();
        assert!(manager.load_config(&path).unwrap());
        assert_eq!(manager.query(PermissionKind::Env, "ANYTHING"), Decision::Granted);
        assert_eq!(manager.query(PermissionKind::Read, "/x"), Decision::Denied);
    }

    #[test]
    fn grants_replace_the_previous_list() {
        let manager = PermissionManager::builder().build();
        manager.grant_read(&["/a".to_string()]).unwrap();
        assert!(manager.check(PermissionKind::Read, "/a/x"));

        manager.grant_read(&["/b".to_string()]).unwrap();
        assert!(!manager.check(PermissionKind::Read, "/a/x"));
        assert!(manager.check(PermissionKind::Read, "/b/x"));
    }
}
