//! Resolution of job instances for records scheduled by type.
//!
//! A record scheduled with [`crate::Scheduler::schedule_job`] carries its own instance. Records
//! scheduled by type are resolved lazily, right before each attempt, by first asking the
//! configured [`DependencyProvider`] and then falling back to the type's [`Default`]
//! constructor, when it has one.
use std::{
    any::{type_name, TypeId},
    sync::Arc,
};

use fxhash::FxHashMap;

use super::{Job, Priority};

/// A reference to a job type, used to build instances of it on demand.
#[derive(Debug, Clone, Copy)]
pub struct JobType {
    name: &'static str,
    type_id: TypeId,
    priority: Priority,
    default: Option<fn() -> Arc<dyn Job>>,
}

fn construct_default<J: Job + Default>() -> Arc<dyn Job> {
    Arc::new(J::default())
}

impl JobType {
    /// A job type that can be built through its [`Default`] implementation.
    pub fn of<J: Job + Default>() -> Self {
        Self {
            default: Some(construct_default::<J>),
            ..Self::provided::<J>()
        }
    }

    /// A job type that can only be built by a [`DependencyProvider`].
    pub fn provided<J: Job>() -> Self {
        Self {
            name: type_name::<J>(),
            type_id: TypeId::of::<J>(),
            priority: J::priority(),
            default: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// The priority declared by the job type.
    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }

    pub fn is<J: Job>(&self) -> bool {
        self.type_id == TypeId::of::<J>()
    }
}

impl PartialEq for JobType {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for JobType {}

/// Supplies job instances, typically with their dependencies injected.
#[cfg_attr(test, mockall::automock)]
pub trait DependencyProvider: Send + Sync {
    /// Whether [`DependencyProvider::provide`] can build the given type.
    fn can_provide(&self, job_type: &JobType) -> bool;

    /// Builds a fresh instance, or `None` when the type is unknown.
    fn provide(&self, job_type: &JobType) -> Option<Arc<dyn Job>>;
}

type Factory = Box<dyn Fn() -> Arc<dyn Job> + Send + Sync>;

/// A [`DependencyProvider`] backed by factory closures registered per job type.
///
/// # Example
///
/// ```
/// # use hopper::prelude::*;
/// # use std::sync::Arc;
/// struct SendEmail {
///     smtp_host: Arc<String>,
/// }
///
/// #[async_trait::async_trait]
/// impl Job for SendEmail {
///     async fn perform(&self) -> ExecutionResult {
///         ExecutionResult::Done
///     }
/// }
///
/// let smtp_host = Arc::new("smtp.example.com".to_owned());
/// let registry = JobRegistry::new().register(move || SendEmail {
///     smtp_host: smtp_host.clone(),
/// });
/// assert!(registry.can_provide(&JobType::provided::<SendEmail>()));
/// ```
#[derive(Default)]
pub struct JobRegistry {
    factories: FxHashMap<TypeId, Factory>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory for `J`, replacing any previous one.
    pub fn register<J, F>(mut self, factory: F) -> Self
    where
        J: Job,
        F: Fn() -> J + Send + Sync + 'static,
    {
        self.factories.insert(
            TypeId::of::<J>(),
            Box::new(move || Arc::new(factory()) as Arc<dyn Job>),
        );
        self
    }
}

impl DependencyProvider for JobRegistry {
    fn can_provide(&self, job_type: &JobType) -> bool {
        self.factories.contains_key(&job_type.type_id())
    }

    fn provide(&self, job_type: &JobType) -> Option<Arc<dyn Job>> {
        self.factories
            .get(&job_type.type_id())
            .map(|factory| factory())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InstantiationError {
    #[error("No dependency provider or default constructor available for job type {0}")]
    NoConstructor(&'static str),
}

/// Tries the dependency provider, then the default constructor.
#[derive(Clone, Default)]
pub(crate) struct Instantiator {
    provider: Option<Arc<dyn DependencyProvider>>,
}

impl Instantiator {
    pub(crate) fn new(provider: Option<Arc<dyn DependencyProvider>>) -> Self {
        Self { provider }
    }

    /// Whether an instance of the type could be built at all.
    pub(crate) fn can_instantiate(&self, job_type: &JobType) -> bool {
        job_type.has_default()
            || self
                .provider
                .as_ref()
                .is_some_and(|provider| provider.can_provide(job_type))
    }

    pub(crate) fn instantiate(&self, job_type: &JobType) -> Result<Arc<dyn Job>, InstantiationError> {
        self.provider
            .as_ref()
            .and_then(|provider| provider.provide(job_type))
            .or_else(|| job_type.default.map(|default| default()))
            .ok_or(InstantiationError::NoConstructor(job_type.name()))
    }
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use mockall::predicate::*;

    use super::*;
    use crate::job::{
        test::{FailingJob, SuccessfulJob},
        ExecutionResult,
    };

    struct NeedsDependency(#[allow(dead_code)] u32);

    #[async_trait]
    impl Job for NeedsDependency {
        fn priority() -> Priority {
            Priority::High
        }

        async fn perform(&self) -> ExecutionResult {
            ExecutionResult::Done
        }
    }

    #[test]
    fn job_type_metadata() {
        let job_type = JobType::provided::<NeedsDependency>();

        assert!(job_type.name().ends_with("NeedsDependency"));
        assert_eq!(job_type.priority(), Priority::High);
        assert!(!job_type.has_default());
        assert!(job_type.is::<NeedsDependency>());
        assert!(JobType::of::<SuccessfulJob>().has_default());
        assert_ne!(JobType::of::<SuccessfulJob>(), JobType::of::<FailingJob>());
    }

    #[test]
    fn falls_back_to_default_constructor() {
        let instantiator = Instantiator::default();
        let job_type = JobType::of::<SuccessfulJob>();

        assert!(instantiator.can_instantiate(&job_type));
        assert!(instantiator.instantiate(&job_type).is_ok());
    }

    #[test]
    fn fails_without_provider_or_default() {
        let instantiator = Instantiator::default();
        let job_type = JobType::provided::<NeedsDependency>();

        assert!(!instantiator.can_instantiate(&job_type));
        assert_matches!(
            instantiator.instantiate(&job_type).err(),
            Some(InstantiationError::NoConstructor(name)) if name.ends_with("NeedsDependency")
        );
    }

    #[test]
    fn provider_is_tried_first() {
        let job_type = JobType::of::<SuccessfulJob>();
        let mut provider = MockDependencyProvider::new();
        provider
            .expect_provide()
            .with(eq(job_type))
            .times(1)
            .returning(|_| Some(Arc::new(FailingJob)));

        let instantiator = Instantiator::new(Some(Arc::new(provider)));

        assert!(instantiator.instantiate(&job_type).is_ok());
    }

    #[test]
    fn default_is_used_when_provider_declines() {
        let mut provider = MockDependencyProvider::new();
        provider.expect_provide().times(1).returning(|_| None);

        let instantiator = Instantiator::new(Some(Arc::new(provider)));

        assert!(instantiator
            .instantiate(&JobType::of::<SuccessfulJob>())
            .is_ok());
    }

    #[test]
    fn registry_provides_registered_types() {
        let registry = JobRegistry::new().register(|| NeedsDependency(7));
        let instantiator = Instantiator::new(Some(Arc::new(registry)));
        let job_type = JobType::provided::<NeedsDependency>();

        assert!(instantiator.can_instantiate(&job_type));
        assert!(instantiator.instantiate(&job_type).is_ok());
        assert!(!instantiator.can_instantiate(&JobType::provided::<FailingJob>()));
    }
}
