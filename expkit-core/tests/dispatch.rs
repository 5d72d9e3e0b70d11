//! End-to-end dispatch over declaration files on disk.

use std::sync::{Arc, Mutex};

use expkit_core::{
    ClusterEnv, DispatchError, EntryTable, ExpkitError, LaunchRequest, Launcher, ParamBundle,
    ParamValue,
};

const DECLARATIONS: &str = r#"
from higgsfield.experiment import experiment, param

@experiment("alpaca_fp16")
@param("size", options=["7b", "13b", "70b"])
@param("num_epochs", default=1)
@param("data_path", required=True)
@param("fp16", default=False)
def train(params):
    pass
"#;

struct Fixture {
    _dir: tempfile::TempDir,
    launcher: Launcher,
    calls: Arc<Mutex<Vec<ParamBundle>>>,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("src");
    std::fs::create_dir(&src).unwrap();
    std::fs::write(src.join("experiments.py"), DECLARATIONS).unwrap();

    let calls: Arc<Mutex<Vec<ParamBundle>>> = Arc::default();
    let sink = Arc::clone(&calls);
    let entries = EntryTable::new().bind("train", move |bundle: &ParamBundle| -> anyhow::Result<()> {
        sink.lock().unwrap().push(bundle.clone());
        Ok(())
    });

    let cluster = ClusterEnv {
        rank: 1,
        world_size: 2,
        local_rank: 1,
    };
    let launcher = Launcher::new(cluster).with_declarations(&src, "py", Arc::new(entries));
    Fixture {
        _dir: dir,
        launcher,
        calls,
    }
}

fn request(args: &[&str]) -> LaunchRequest {
    LaunchRequest::new("llm", "alpaca_fp16", "run_7").with_args(args.iter().copied())
}

#[test]
fn resolves_options_and_defaults() {
    let mut fx = fixture();
    fx.launcher
        .dispatch(&request(&["hf_action_size=13b", "hf_action_data_path=/data"]))
        .unwrap();

    let calls = fx.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    let bundle = &calls[0];
    assert_eq!(bundle.str("size"), Some("13b"));
    assert_eq!(bundle.int("num_epochs"), Some(1));
    assert_eq!(bundle.bool("fp16"), Some(false));
    assert_eq!(bundle.int("seed"), Some(42));
    assert_eq!(bundle.str("data_path"), Some("/data"));

    let context = bundle.context();
    assert_eq!(context.experiment_name, "alpaca_fp16");
    assert_eq!(context.project_name, "llm");
    assert_eq!(context.run_name, "run_7");
    assert_eq!((context.rank, context.world_size, context.local_rank), (1, 2, 1));
}

#[test]
fn later_duplicate_args_win() {
    let mut fx = fixture();
    fx.launcher
        .dispatch(&request(&[
            "hf_action_data_path=/a",
            "hf_action_num_epochs=3",
            "garbage",
            "hf_action_num_epochs=5",
            "hf_action_seed=9",
        ]))
        .unwrap();

    let calls = fx.calls.lock().unwrap();
    assert_eq!(calls[0].get("num_epochs"), Some(&ParamValue::Int(5)));
    assert_eq!(calls[0].int("seed"), Some(9));
}

#[test]
fn missing_experiment() {
    let mut fx = fixture();
    let err = fx
        .launcher
        .dispatch(&LaunchRequest::new("llm", "missing", "r"))
        .unwrap_err();
    assert!(matches!(
        err,
        ExpkitError::Dispatch(DispatchError::ExperimentNotFound { ref name }) if name == "missing"
    ));
    assert_eq!(fx.launcher.registry().names(), vec!["alpaca_fp16"]);
}

#[test]
fn missing_required_parameter() {
    let mut fx = fixture();
    let err = fx.launcher.dispatch(&request(&[])).unwrap_err();
    assert!(matches!(
        err,
        ExpkitError::Dispatch(DispatchError::MissingRequiredParameter { ref name }) if name == "data_path"
    ));
    assert!(fx.calls.lock().unwrap().is_empty());
}

#[test]
fn invalid_values() {
    let mut fx = fixture();
    for arg in ["hf_action_size=30b", "hf_action_num_epochs=two", "hf_action_fp16=True"] {
        let err = fx
            .launcher
            .dispatch(&request(&[arg, "hf_action_data_path=/d"]))
            .unwrap_err();
        assert!(
            matches!(err, ExpkitError::Dispatch(DispatchError::InvalidValue { .. })),
            "{arg} should be rejected"
        );
    }
}

#[test]
fn invalid_arguments_checked_before_loading() {
    let mut fx = fixture();
    let err = fx
        .launcher
        .dispatch(&request(&[]).with_max_repeats(-5))
        .unwrap_err();
    assert!(matches!(
        err,
        ExpkitError::Dispatch(DispatchError::InvalidArguments { .. })
    ));
    assert!(fx.launcher.registry().is_empty());
}

#[test]
fn declarations_load_once_across_dispatches() {
    let mut fx = fixture();
    let args = ["hf_action_data_path=/d"];
    fx.launcher.dispatch(&request(&args)).unwrap();
    fx.launcher.dispatch(&request(&args)).unwrap();
    assert_eq!(fx.calls.lock().unwrap().len(), 2);
    assert_eq!(fx.launcher.registry().len(), 1);
}

#[test]
fn free_dispatch_reads_declarations_root() {
    let fx = fixture();
    let root = fx._dir.path().join("src");
    let calls: Arc<Mutex<usize>> = Arc::default();
    let counter = Arc::clone(&calls);
    let entries = EntryTable::new().with_fallback(move |_: &ParamBundle| -> anyhow::Result<()> {
        *counter.lock().unwrap() += 1;
        Ok(())
    });

    expkit_core::dispatch(
        &root,
        "py",
        Arc::new(entries),
        &request(&["hf_action_data_path=/d"]),
    )
    .unwrap();
    assert_eq!(*calls.lock().unwrap(), 1);
}
