//! Releasing every native handle a context holds.
//!
//! Teardown walks a fixed sequence and never stops early:
//!
//! 1. the application domain of the host
//! 2. the runtime host itself
//! 3. every cached entry point, in insertion order
//! 4. the metadata host the runtime was created from
//!
//! Each step's outcome is recorded in a [`TeardownReport`]; a failing step is logged and the
//! next one runs regardless.

use std::sync::{Arc, PoisonError};

use strum::Display;

use crate::{backend::ClrBackend, cache::ContentHash, config::ClrConfig, Error, Result};

use super::RuntimeContext;

/// One release performed during teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum TeardownStep {
    /// The application domain associated with the host
    AppDomain,
    /// The runtime host handle
    RuntimeHost,
    /// The entry point of the assembly loaded from bytes with this digest
    Assembly(ContentHash),
    /// The metadata host used to create the runtime
    MetaHost,
}

/// Outcome of every step of one teardown, in the order the steps ran.
#[derive(Debug, Default)]
pub struct TeardownReport {
    steps: Vec<(TeardownStep, Result<()>)>,
}

impl TeardownReport {
    /// Iterates over the steps that ran and their outcome
    pub fn steps(&self) -> impl Iterator<Item = (TeardownStep, &Result<()>)> {
        self.steps.iter().map(|(step, result)| (*step, result))
    }

    /// Iterates over the steps that failed
    pub fn failures(&self) -> impl Iterator<Item = (TeardownStep, &Error)> {
        self.steps
            .iter()
            .filter_map(|(step, result)| result.as_ref().err().map(|error| (*step, error)))
    }

    /// Returns true if every step that ran succeeded
    pub fn is_clean(&self) -> bool {
        self.steps.iter().all(|(_, result)| result.is_ok())
    }

    /// Returns the number of steps that ran
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if teardown had nothing to release
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    fn record(&mut self, step: TeardownStep, result: Result<()>, debug: bool) {
        if let Err(error) = &result {
            debug_log!(debug, warn, %step, %error, "teardown step failed");
        }
        self.steps.push((step, result));
    }
}

impl<B: ClrBackend> RuntimeContext<B> {
    /// Releases the host, every cached assembly and the metadata host, then resets the context.
    ///
    /// Steps without anything to release are skipped: a context that never started a host
    /// and holds no assemblies makes no native call at all, so a second teardown is a no-op.
    /// Afterwards the cache is empty and the next [`RuntimeContext::load`] starts a fresh host.
    pub fn teardown(&mut self, config: &ClrConfig) -> TeardownReport {
        let debug = config.debug;
        let mut report = TeardownReport::default();
        let was_started = self.host.is_initialized();

        if let Some(host) = self.host.take() {
            let result = self.backend.app_domain(&host).and_then(|domain| {
                debug_log!(debug, "release appDomain");
                self.backend.release_app_domain(domain)
            });
            report.record(TeardownStep::AppDomain, result, debug);

            debug_log!(debug, "release runtimeHost");
            report.record(TeardownStep::RuntimeHost, self.backend.release_host(host), debug);
        }

        let records = self
            .assemblies
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .drain();
        let had_records = !records.is_empty();
        debug_log!(debug, count = records.len(), "release assemblies");

        for record in records {
            let hash = *record.hash();
            // Loads drop their clone before returning and teardown holds `&mut self`, so the
            // cache owns the only reference here.
            let result = match Arc::into_inner(record) {
                Some(record) => self.backend.release_method(record.into_method()),
                None => Err(Error::Release(format!("entry point {hash} is still shared"))),
            };
            report.record(TeardownStep::Assembly(hash), result, debug);
        }

        if was_started || had_records {
            let result = self.backend.meta_host().and_then(|meta_host| {
                debug_log!(debug, "release metaHost");
                self.backend.release_meta_host(meta_host)
            });
            report.record(TeardownStep::MetaHost, result, debug);
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{assembly_bytes, Call, Failures, RecordingBackend};

    fn loaded_context(backend: RecordingBackend, count: u8) -> RuntimeContext<RecordingBackend> {
        let context = RuntimeContext::new(backend);
        for seed in 0..count {
            context
                .load(&assembly_bytes(256, seed), &["run"], &ClrConfig::v4())
                .unwrap();
        }
        context
    }

    #[test]
    fn test_release_order() {
        let mut context = loaded_context(RecordingBackend::new(), 3);

        let report = context.teardown(&ClrConfig::v4());
        assert!(report.is_clean());
        assert_eq!(report.len(), 6);

        assert_eq!(
            context.backend().releases(),
            vec![
                Call::ReleaseAppDomain(1),
                Call::ReleaseHost(1),
                Call::ReleaseMethod(1),
                Call::ReleaseMethod(2),
                Call::ReleaseMethod(3),
                Call::ReleaseMetaHost(1),
            ]
        );

        let steps: Vec<String> = report.steps().map(|(step, _)| step.to_string()).collect();
        assert_eq!(
            steps,
            vec![
                "app_domain",
                "runtime_host",
                "assembly",
                "assembly",
                "assembly",
                "meta_host"
            ]
        );
    }

    #[test]
    fn test_assembly_steps_carry_hash() {
        let mut context = loaded_context(RecordingBackend::new(), 2);
        let report = context.teardown(&ClrConfig::v4());

        let hashes: Vec<ContentHash> = report
            .steps()
            .filter_map(|(step, _)| match step {
                TeardownStep::Assembly(hash) => Some(hash),
                _ => None,
            })
            .collect();
        assert_eq!(
            hashes,
            vec![
                ContentHash::of(&assembly_bytes(256, 0)),
                ContentHash::of(&assembly_bytes(256, 1)),
            ]
        );
    }

    #[test]
    fn test_teardown_resets_state() {
        let mut context = loaded_context(RecordingBackend::new(), 2);
        let _ = context.teardown(&ClrConfig::v4());

        assert_eq!(context.cached_assemblies(), 0);
        assert!(!context.is_initialized());

        let assembly = assembly_bytes(256, 0);
        context.load(&assembly, &["again"], &ClrConfig::v4()).unwrap();

        let backend = context.backend();
        assert_eq!(backend.starts(), 2);
        assert_eq!(backend.loads(), 3);
        assert_eq!(*context.acquire_host(&ClrConfig::v4()).unwrap(), 2);
    }

    #[test]
    fn test_second_teardown_is_noop() {
        let mut context = loaded_context(RecordingBackend::new(), 1);
        let first = context.teardown(&ClrConfig::v4());
        assert_eq!(first.len(), 4);

        let calls_before = context.backend().calls().len();
        let second = context.teardown(&ClrConfig::v4());
        assert!(second.is_empty());
        assert!(second.is_clean());
        assert_eq!(context.backend().calls().len(), calls_before);
    }

    #[test]
    fn test_teardown_of_unused_context() {
        let mut context = RuntimeContext::new(RecordingBackend::new());
        let report = context.teardown(&ClrConfig::v4());
        assert!(report.is_empty());
        assert!(context.backend().calls().is_empty());
    }

    #[test]
    fn test_failures_do_not_stop_teardown() {
        let backend = RecordingBackend::with_failures(Failures {
            app_domain: true,
            release_host: true,
            release_method: true,
            ..Failures::default()
        });
        let mut context = loaded_context(backend, 2);

        let report = context.teardown(&ClrConfig::v4().with_debug(true));
        assert!(!report.is_clean());

        let failed: Vec<String> = report
            .failures()
            .map(|(step, _)| step.to_string())
            .collect();
        assert_eq!(
            failed,
            vec!["app_domain", "runtime_host", "assembly", "assembly"]
        );
        assert_eq!(
            context.backend().releases(),
            vec![
                Call::ReleaseHost(1),
                Call::ReleaseMethod(1),
                Call::ReleaseMethod(2),
                Call::ReleaseMetaHost(1),
            ]
        );
        assert_eq!(context.cached_assemblies(), 0);
        assert!(!context.is_initialized());
    }

    #[test]
    fn test_meta_host_failure_is_recorded() {
        let backend = RecordingBackend::with_failures(Failures {
            meta_host: true,
            ..Failures::default()
        });
        let mut context = loaded_context(backend, 1);

        let report = context.teardown(&ClrConfig::v4());
        let failed: Vec<TeardownStep> = report.failures().map(|(step, _)| step).collect();
        assert_eq!(failed, vec![TeardownStep::MetaHost]);
        assert_eq!(report.len(), 4);

        let calls = context.backend().calls();
        assert_eq!(calls.last(), Some(&Call::MetaHost));
        assert!(!calls.iter().any(|call| matches!(call, Call::ReleaseMetaHost(_))));
    }

    #[test]
    fn test_release_failures_of_domain_and_meta_host() {
        let backend = RecordingBackend::with_failures(Failures {
            release_app_domain: true,
            release_meta_host: true,
            ..Failures::default()
        });
        let mut context = loaded_context(backend, 1);

        let report = context.teardown(&ClrConfig::v4().with_debug(true));
        let failed: Vec<TeardownStep> = report.failures().map(|(step, _)| step).collect();
        assert_eq!(failed, vec![TeardownStep::AppDomain, TeardownStep::MetaHost]);
        assert!(report
            .failures()
            .all(|(_, error)| matches!(error, Error::Release(_))));

        assert_eq!(
            context.backend().releases(),
            vec![
                Call::ReleaseAppDomain(1),
                Call::ReleaseHost(1),
                Call::ReleaseMethod(1),
                Call::ReleaseMetaHost(1),
            ]
        );
        assert!(!context.is_initialized());
    }

    #[test]
    fn test_concurrent_loads_leave_records_unshared() {
        let mut context = RuntimeContext::new(RecordingBackend::new());
        std::thread::scope(|scope| {
            for seed in 0..4_u8 {
                let context = &context;
                scope.spawn(move || {
                    for _ in 0..8 {
                        context
                            .load(&assembly_bytes(256, seed), &["run"], &ClrConfig::v4())
                            .unwrap();
                    }
                });
            }
        });

        let report = context.teardown(&ClrConfig::v4());
        assert!(report.is_clean());
        let released = context
            .backend()
            .releases()
            .into_iter()
            .filter(|call| matches!(call, Call::ReleaseMethod(_)))
            .count();
        assert_eq!(released, 4);
    }

    #[test]
    fn test_failed_start_is_reset_by_teardown() {
        let backend = RecordingBackend::with_failures(Failures {
            start: true,
            ..Failures::default()
        });
        let mut context = RuntimeContext::new(backend);
        assert!(context.acquire_host(&ClrConfig::v4()).is_err());

        let report = context.teardown(&ClrConfig::v4());
        let steps: Vec<TeardownStep> = report.steps().map(|(step, _)| step).collect();
        assert_eq!(steps, vec![TeardownStep::MetaHost]);

        assert!(context.acquire_host(&ClrConfig::v4()).is_err());
        assert_eq!(context.backend().starts(), 2);
    }
}
