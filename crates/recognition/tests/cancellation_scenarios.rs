use std::sync::{Arc, Mutex};

use dictara_recognition::{
    BackendCancellation, CanceledEventArgs, CancellationErrorCode, CancellationReason,
    DispatchConfig, Error, EventDispatcher, HandleTable, HandlerResult, NativeEngine, RawHandle,
    RecognitionError, ResultEnvelope, ResultOutcome, SessionState,
};

fn session(id: &str) -> (Arc<HandleTable>, EventDispatcher) {
    let table = Arc::new(HandleTable::new());
    let dispatcher = EventDispatcher::new(id, table.clone(), DispatchConfig::default());
    (table, dispatcher)
}

/// What a handler saw, copied out during the dispatch.
#[derive(Debug, Clone, PartialEq)]
struct Observed {
    reason: CancellationReason,
    code: CancellationErrorCode,
    details: String,
    rendered: String,
}

fn record_into(
    sink: &Arc<Mutex<Vec<Observed>>>,
) -> impl Fn(&CanceledEventArgs) -> HandlerResult + Send + Sync + 'static {
    let sink = sink.clone();
    move |args: &CanceledEventArgs| {
        sink.lock().unwrap().push(Observed {
            reason: args.reason(),
            code: args.error_code(),
            details: args.error_details().to_string(),
            rendered: args.to_string(),
        });
        Ok(())
    }
}

#[test]
fn scenario_a_auth_failure() {
    let (table, dispatcher) = session("s1");
    let observed = Arc::new(Mutex::new(Vec::new()));
    dispatcher.canceled().connect(record_into(&observed));

    let handle = table.insert_canceled(
        ResultEnvelope::new("s1", "r1", ResultOutcome::Canceled),
        BackendCancellation::error("AuthFailure", "401 invalid key"),
    );
    dispatcher.begin_cancel().unwrap();
    dispatcher.raise_canceled(handle).unwrap();

    let observed = observed.lock().unwrap();
    assert_eq!(observed.len(), 1);
    assert_eq!(observed[0].reason.to_string(), "Error");
    assert_eq!(observed[0].code.to_string(), "AuthFailure");
    assert!(observed[0].rendered.contains(
        "SessionId:s1 ResultId:r1 CancellationReason:Error CancellationErrorCode:AuthFailure Error details:<401 invalid key"
    ));
}

#[test]
fn scenario_b_clean_end_of_stream() {
    let (table, dispatcher) = session("s2");
    let observed = Arc::new(Mutex::new(Vec::new()));
    dispatcher.canceled().connect(record_into(&observed));

    let handle = table.insert_canceled(
        ResultEnvelope::new("s2", "r2", ResultOutcome::Canceled),
        BackendCancellation::EndOfStream,
    );
    dispatcher.begin_cancel().unwrap();
    dispatcher.raise_canceled(handle).unwrap();

    let observed = observed.lock().unwrap();
    assert_eq!(observed[0].reason, CancellationReason::EndOfStream);
    assert_eq!(observed[0].code, CancellationErrorCode::NoError);
    assert_eq!(observed[0].details, "");
}

#[test]
fn scenario_c_failing_handler_does_not_block_others() {
    let (table, dispatcher) = session("s3");
    let observed = Arc::new(Mutex::new(Vec::new()));

    let failing = dispatcher
        .canceled()
        .connect(|_: &CanceledEventArgs| Err("first handler failed".into()));
    dispatcher.canceled().connect(record_into(&observed));

    let handle = table.insert_canceled(
        ResultEnvelope::new("s3", "r3", ResultOutcome::Canceled),
        BackendCancellation::error("503", "service unavailable"),
    );
    dispatcher.begin_cancel().unwrap();
    let result = dispatcher.raise_canceled(handle);

    assert_eq!(observed.lock().unwrap().len(), 1);
    match result {
        Err(Error::Dispatch(error)) => {
            assert_eq!(error.invoked, 2);
            assert_eq!(error.failures.len(), 1);
            assert_eq!(error.failures[0].handler, failing);
            assert_eq!(error.failures[0].message, "first handler failed");
        }
        other => panic!("expected one aggregated dispatch failure, got {:?}", other),
    }
    assert_eq!(dispatcher.state(), SessionState::Canceled);
}

#[test]
fn scenario_d_null_handle() {
    let (_table, dispatcher) = session("s4");
    let observed = Arc::new(Mutex::new(Vec::new()));
    dispatcher.canceled().connect(record_into(&observed));

    let engine: Arc<dyn NativeEngine> = Arc::new(HandleTable::new());
    assert!(matches!(
        CanceledEventArgs::new(&engine, RawHandle::NULL, true),
        Err(RecognitionError::InvalidHandle { .. })
    ));

    dispatcher.begin_cancel().unwrap();
    let result = dispatcher.raise_canceled(RawHandle::NULL);

    assert!(matches!(
        result,
        Err(Error::Recognition(RecognitionError::InvalidHandle { .. }))
    ));
    assert!(observed.lock().unwrap().is_empty());
    assert_eq!(dispatcher.state(), SessionState::Canceling);
}

#[test]
fn error_codes_imply_error_reason() {
    let signals = vec![
        BackendCancellation::error("400", "bad audio format"),
        BackendCancellation::error("403", "forbidden"),
        BackendCancellation::error("429", "throttled"),
        BackendCancellation::error("1006", "connection reset"),
        BackendCancellation::error("504", "timeout"),
        BackendCancellation::error("E_UNKNOWN", "mystery"),
        BackendCancellation::Error {
            code: None,
            message: "no code".to_string(),
        },
    ];

    for signal in signals {
        let table = Arc::new(HandleTable::new());
        let engine: Arc<dyn NativeEngine> = table.clone();
        let handle = table.insert_canceled(
            ResultEnvelope::generated("s1", ResultOutcome::Canceled),
            signal.clone(),
        );

        let args = CanceledEventArgs::new(&engine, handle, true).unwrap();
        assert_eq!(args.reason(), CancellationReason::Error, "{:?}", signal);
        assert_ne!(args.error_code(), CancellationErrorCode::NoError, "{:?}", signal);
    }
}

#[test]
fn fields_survive_external_release() {
    let table = Arc::new(HandleTable::new());
    let engine: Arc<dyn NativeEngine> = table.clone();
    let handle = table.insert_canceled(
        ResultEnvelope::new("s1", "r1", ResultOutcome::Canceled),
        BackendCancellation::error("500", "backend fault"),
    );

    let args = CanceledEventArgs::new(&engine, handle, true).unwrap();
    let before = (args.reason(), args.error_code(), args.to_string());

    // The handle is already gone; a stray release is rejected and changes nothing.
    assert_eq!(
        table.release_handle(handle),
        Err(RecognitionError::DoubleRelease { handle })
    );

    assert_eq!((args.reason(), args.error_code(), args.to_string()), before);
    assert_eq!(args.error_details(), "backend fault");
    assert_eq!(args.error_details(), args.error_details());
}

#[test]
fn non_canceled_results_never_produce_args() {
    for outcome in [ResultOutcome::Recognized, ResultOutcome::NoMatch] {
        let table = Arc::new(HandleTable::new());
        let engine: Arc<dyn NativeEngine> = table.clone();
        let handle = table.insert(ResultEnvelope::generated("s1", outcome));

        let result = CanceledEventArgs::new(&engine, handle, false);
        assert!(
            matches!(result, Err(RecognitionError::InvalidState { .. })),
            "{} produced event args",
            outcome
        );
    }
}
