//! End-to-end bridge behaviour against the loopback runtime.

use std::time::{Duration, Instant};

use crossbeam_channel::{after, select};
use mdb_bridge::loopback::Loopback;
use mdb_bridge::symbol_codec::{decode_native_symbol, decode_symbol_list};
use mdb_bridge::{
    BridgeError, EncodedSymbolList, EventCodecRegistry, Executor, ExecutorPump, NativeException,
    PromiseState, SystemProperties, decode_symbol, encode_symbol,
};
use mdb_core::types::{CandleSymbol, IndexedEventSource, MarketEvent, Quote, Symbol};

fn quote(symbol: &str, bid: f64, ask: f64) -> MarketEvent {
    Quote {
        event_symbol: symbol.into(),
        bid_price: bid,
        ask_price: ask,
        ..Quote::new(symbol)
    }
    .into()
}

fn candle(text: &str) -> CandleSymbol {
    CandleSymbol::parse(text).unwrap()
}

fn all_symbols() -> Vec<Symbol> {
    vec![
        Symbol::from("AAPL"),
        Symbol::Wildcard,
        Symbol::Candle(candle("AAPL{=5m}")),
        Symbol::Candle(candle("a}{{==x}")),
        Symbol::indexed("IBM", IndexedEventSource::default_source()),
        Symbol::indexed(candle("SPY{=1d}"), IndexedEventSource::order(1002, "NTV")),
        Symbol::time_series("MSFT", 1_700_000_000_000),
        Symbol::time_series(Symbol::Wildcard, -1),
    ]
}

#[test]
fn every_symbol_variant_round_trips() {
    for symbol in all_symbols() {
        let encoded = encode_symbol(&symbol).unwrap();
        let decoded = unsafe { decode_symbol(encoded.as_ptr()) }.unwrap();
        assert_eq!(decoded, symbol);
    }
}

#[test]
fn symbol_lists_and_runtime_symbols() {
    let symbols = all_symbols();
    let list = EncodedSymbolList::encode(&symbols).unwrap();
    assert_eq!(list.len(), symbols.len());
    let decoded = unsafe { decode_symbol_list(list.as_ptr()) }.unwrap();
    assert_eq!(decoded, symbols);

    let lb = Loopback::start().unwrap();
    let before = lb.live_objects();
    for symbol in &symbols {
        let native = lb.native_symbol(symbol).unwrap();
        assert_eq!(&decode_native_symbol(native).unwrap(), symbol);
    }
    assert_eq!(lb.live_objects(), before);
}

#[test]
fn nested_wrapper_is_unsupported() {
    let indexed = Symbol::indexed("AAPL", IndexedEventSource::default_source());
    let nested = Symbol::time_series(indexed, 0);
    let err = encode_symbol(&nested).unwrap_err();
    assert!(matches!(err, BridgeError::UnsupportedSymbolType(_)));
}

#[test]
fn quote_list_round_trips_in_order() {
    let lb = Loopback::start().unwrap();
    let (promise, completer) = lb.new_promise().unwrap();
    completer.complete_events(vec![
        quote("TEST1", 10.1, 10.2),
        quote("TEST2", 17.1, 17.2),
    ]);

    let events = promise.results().unwrap();
    assert_eq!(events.len(), 2);
    let quotes: Vec<_> = events
        .iter()
        .map(|e| match e {
            MarketEvent::Quote(q) => (q.event_symbol.as_str(), q.bid_price, q.ask_price),
            other => panic!("expected a quote, got {other}"),
        })
        .collect();
    assert_eq!(quotes, [("TEST1", 10.1, 10.2), ("TEST2", 17.1, 17.2)]);
    let MarketEvent::Quote(first) = &events[0] else {
        panic!("expected a quote")
    };
    assert!(first.bid_size.is_nan());
}

#[test]
fn event_list_codec_without_runtime() {
    let registry = EventCodecRegistry::default();
    let events = vec![quote("TEST1", 10.1, 10.2), quote("TEST2", 17.1, 17.2)];
    let list = registry.encode_list(&events).unwrap();
    let decoded = unsafe { registry.decode_list(list.as_ptr()) }.unwrap();
    let symbols: Vec<_> = decoded.iter().map(MarketEvent::event_symbol).collect();
    assert_eq!(symbols, ["TEST1", "TEST2"]);
}

#[test]
fn failed_promise_does_not_block() {
    let lb = Loopback::start().unwrap();
    let (promise, completer) = lb.new_promise().unwrap();
    completer.fail("java.lang.IllegalArgumentException", "unknown symbol");

    let started = Instant::now();
    let err = promise.result().unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(1));
    let BridgeError::PromiseFailure(e) = err else {
        panic!("expected a promise failure")
    };
    assert_eq!(e.message, "unknown symbol");
    assert!(!e.stack_trace.is_empty());
}

#[test]
fn cancel_after_completion_keeps_result() {
    let lb = Loopback::start().unwrap();
    let (promise, completer) = lb.new_promise().unwrap();
    assert!(completer.complete_event(quote("AAPL", 1.0, 2.0)));
    promise.cancel().unwrap();
    assert!(!promise.is_cancelled().unwrap());
    assert_eq!(promise.state().unwrap(), PromiseState::Completed);
    assert_eq!(promise.result().unwrap().event_symbol(), "AAPL");
}

#[test]
fn caller_composes_deadline_with_done_signal() {
    let lb = Loopback::start().unwrap();
    let (promise, _completer) = lb.new_promise().unwrap();
    let signal = promise.done_signal();
    let timed_out = select! {
        recv(signal) -> _ => false,
        recv(after(Duration::from_millis(50))) -> _ => true,
    };
    assert!(timed_out);
    assert!(!promise.is_done().unwrap());
    promise.dispose().unwrap();
}

#[test]
fn closing_releases_native_objects() {
    let lb = Loopback::start().unwrap();
    let executor = Executor::new(lb.isolate()).unwrap();
    let before = lb.live_objects();
    executor.close().unwrap();
    assert_eq!(lb.live_objects(), before - 1);

    let (promise, _completer) = lb.new_promise().unwrap();
    promise.dispose().unwrap();
}

#[test]
fn system_properties() {
    let lb = Loopback::start().unwrap();
    let props = SystemProperties::new(lb.isolate());
    assert_eq!(props.get_property("never_set").unwrap(), None);
    props.set_property("key_1", "value_1").unwrap();
    let value = props.get_property("key_1").unwrap();
    assert_eq!(value.as_deref(), Some("value_1"));

    // Visible from another thread attached to the same isolate.
    let other = props.clone();
    let attached = lb.attached_threads();
    let seen = std::thread::spawn(move || other.get_property("key_1").unwrap())
        .join()
        .unwrap();
    assert_eq!(seen.as_deref(), Some("value_1"));
    // The reader thread's token is detached when it exits.
    assert_eq!(lb.attached_threads(), attached);
}

#[test]
fn empty_drain_is_one_native_call() {
    let lb = Loopback::start().unwrap();
    let executor = Executor::new(lb.isolate()).unwrap();
    let calls = lb.native_calls();
    assert_eq!(executor.drain().unwrap(), 0);
    assert_eq!(lb.native_calls() - calls, 1);
}

#[test]
fn tasks_enqueued_while_draining_wait_for_next_drain() {
    let lb = Loopback::start().unwrap();
    let executor = Executor::new(lb.isolate()).unwrap();
    let queue = lb.task_queue(&executor).unwrap();
    let inner = queue.clone();
    queue.push(move || {
        inner.push(|| Ok(()));
        Ok(())
    });
    assert_eq!(executor.drain().unwrap(), 1);
    assert_eq!(queue.len(), 1);
    assert_eq!(executor.drain().unwrap(), 1);
}

#[test]
fn pump_keeps_running_after_failures() {
    let lb = Loopback::start().unwrap();
    let executor = Executor::new(lb.isolate()).unwrap();
    let queue = lb.task_queue(&executor).unwrap();
    let pump = ExecutorPump::start(executor, Duration::from_millis(1), None);
    queue.push(|| {
        Err(NativeException::new(
            "java.lang.RuntimeException",
            "first",
            "",
        ))
    });
    let (tx, rx) = crossbeam_channel::bounded(1);
    queue.push(move || {
        let _ = tx.send(());
        Ok(())
    });
    assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
    pump.stop().unwrap().close().unwrap();
}
