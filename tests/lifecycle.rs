//! End-to-end lifecycle of a runtime context against an in-memory backend.

use std::sync::{
    atomic::{AtomicU32, Ordering},
    Mutex,
};

use clrloader::prelude::*;

/// A program is "valid" if it starts with `MZ`; invoking it echoes its arguments.
#[derive(Default)]
struct EchoBackend {
    journal: Mutex<Vec<String>>,
    next: AtomicU32,
}

impl EchoBackend {
    fn log(&self, entry: impl Into<String>) {
        self.journal.lock().unwrap().push(entry.into());
    }

    fn journal(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }

    fn count(&self, prefix: &str) -> usize {
        self.journal()
            .iter()
            .filter(|entry| entry.starts_with(prefix))
            .count()
    }

    fn id(&self) -> u32 {
        self.next.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl ClrBackend for EchoBackend {
    type Host = u32;
    type AppDomain = u32;
    type Method = u32;
    type MetaHost = u32;

    fn start_runtime(&self, version: &str) -> Result<u32> {
        self.log(format!("start {version}"));
        Ok(self.id())
    }

    fn redirect_output(&self) -> Result<()> {
        self.log("redirect");
        Ok(())
    }

    fn load_assembly(&self, _host: &u32, bytes: &[u8]) -> Result<u32> {
        self.log("load");
        if bytes.starts_with(b"MZ") {
            Ok(self.id())
        } else {
            Err(Error::LoadFailure("bad image".to_string()))
        }
    }

    fn invoke(&self, method: &u32, args: &[String]) -> CapturedOutput {
        self.log(format!("invoke {method}"));
        let quoted: Vec<String> = args.iter().map(|arg| format!("[{arg}]")).collect();
        CapturedOutput::new(format!("args: {}", quoted.join(",")), "")
    }

    fn app_domain(&self, host: &u32) -> Result<u32> {
        Ok(*host)
    }

    fn meta_host(&self) -> Result<u32> {
        Ok(0)
    }

    fn release_app_domain(&self, domain: u32) -> Result<()> {
        self.log(format!("release domain {domain}"));
        Ok(())
    }

    fn release_host(&self, host: u32) -> Result<()> {
        self.log(format!("release host {host}"));
        Ok(())
    }

    fn release_method(&self, method: u32) -> Result<()> {
        self.log(format!("release method {method}"));
        Ok(())
    }

    fn release_meta_host(&self, _meta_host: u32) -> Result<()> {
        self.log("release metahost");
        Ok(())
    }
}

fn program(size: usize, marker: u8) -> Vec<u8> {
    let mut data = vec![marker; size];
    data[..2].copy_from_slice(b"MZ");
    data
}

#[test]
fn run_twice_then_teardown() {
    let mut context = RuntimeContext::new(EchoBackend::default());
    let config = ClrConfig::v4();
    let hello = program(2048, 0x11);

    let output = context.load(&hello, &["hello"], &config).unwrap();
    assert_eq!(output, "args: [hello]\n");

    let output = context.load(&hello, &[""], &config).unwrap();
    assert_eq!(output, "args: [ ]\n");
    assert_eq!(context.backend().count("load"), 1);

    let other = program(2048, 0x22);
    context.load(&other, &["11111"], &config).unwrap();
    assert_eq!(context.backend().count("load"), 2);
    assert_eq!(context.cached_assemblies(), 2);

    let report = context.teardown(&config);
    assert!(report.is_clean());

    let releases: Vec<String> = context
        .backend()
        .journal()
        .into_iter()
        .filter(|entry| entry.starts_with("release"))
        .collect();
    assert_eq!(
        releases,
        vec![
            "release domain 1",
            "release host 1",
            "release method 2",
            "release method 3",
            "release metahost",
        ]
    );
    assert_eq!(context.cached_assemblies(), 0);
}

#[test]
fn garbage_is_rejected() {
    let context = RuntimeContext::new(EchoBackend::default());
    let garbage = vec![0x00_u8; 128];

    let result = context.load::<&str>(&garbage, &[], &ClrConfig::v4());
    assert!(matches!(result, Err(Error::LoadFailure(_))));
    assert_eq!(context.cached_assemblies(), 0);
    assert!(!context.is_cached(&ContentHash::of(&garbage)));
    assert_eq!(context.backend().count("invoke"), 0);
}

#[test]
fn empty_argument_list_is_passed_through() {
    let context = RuntimeContext::new(EchoBackend::default());
    let output = context
        .load::<&str>(&program(64, 0x33), &[], &ClrConfig::v4())
        .unwrap();
    assert_eq!(output, "args: \n");
}

#[test]
fn teardown_allows_restart() {
    let mut context = RuntimeContext::new(EchoBackend::default());
    let config = ClrConfig::v2().with_debug(true);
    let hello = program(256, 0x44);

    context.load(&hello, &["a"], &config).unwrap();
    let _ = context.teardown(&config);
    assert!(!context.is_initialized());

    context.load(&hello, &["b"], &config).unwrap();
    assert!(context.is_initialized());
    assert_eq!(context.backend().count("start v2"), 2);
    assert_eq!(context.backend().count("load"), 2);
}
