//! Property tests for the symbol and event codecs.

use mdb_bridge::symbol_codec::decode_symbol_list;
use mdb_bridge::{EncodedSymbolList, EventCodecRegistry, decode_symbol, encode_symbol};
use mdb_core::types::{
    Candle, CandleSymbol, IndexedEventSource, MarketEvent, Order, Quote, Summary, Symbol, Trade,
};
use proptest::prelude::*;

fn arb_text() -> impl Strategy<Value = String> {
    "\\PC{0,12}"
}

/// Floats from raw bits so NaN payloads and signed zeros are covered.
fn arb_f64() -> impl Strategy<Value = f64> {
    any::<u64>().prop_map(f64::from_bits)
}

fn arb_candle_symbol() -> impl Strategy<Value = CandleSymbol> {
    let base = "[A-Z{}=]{0,6}".prop_filter("separator in base", |b| !b.contains("{="));
    let aggregation = proptest::option::of("[a-z0-9{}=]{0,4}");
    (base, aggregation).prop_map(|(base, agg)| {
        CandleSymbol::new(base, agg).unwrap()
    })
}

fn arb_source() -> impl Strategy<Value = IndexedEventSource> {
    prop_oneof![
        Just(IndexedEventSource::default_source()),
        (any::<i32>(), arb_text())
            .prop_map(|(id, name)| IndexedEventSource::Generic { id, name }),
        (any::<i32>(), arb_text())
            .prop_map(|(id, name)| IndexedEventSource::order(id, name)),
    ]
}

fn arb_leaf() -> impl Strategy<Value = Symbol> {
    prop_oneof![
        arb_text().prop_map(Symbol::Plain),
        Just(Symbol::Wildcard),
        arb_candle_symbol().prop_map(Symbol::Candle),
    ]
}

fn arb_symbol() -> impl Strategy<Value = Symbol> {
    prop_oneof![
        arb_leaf(),
        (arb_leaf(), arb_source())
            .prop_map(|(s, source)| Symbol::indexed(s, source)),
        (arb_leaf(), any::<i64>())
            .prop_map(|(s, from)| Symbol::time_series(s, from)),
    ]
}

fn arb_quote() -> impl Strategy<Value = MarketEvent> {
    (
        (arb_text(), any::<i64>(), any::<i32>(), any::<i32>()),
        (any::<i64>(), any::<i16>(), arb_f64(), arb_f64()),
        (any::<i64>(), any::<i16>(), arb_f64(), arb_f64()),
    )
        .prop_map(|(head, bid, ask)| {
            Quote {
                event_symbol: head.0,
                event_time: head.1,
                time_millis_sequence: head.2,
                time_nano_part: head.3,
                bid_time: bid.0,
                bid_exchange_code: bid.1,
                bid_price: bid.2,
                bid_size: bid.3,
                ask_time: ask.0,
                ask_exchange_code: ask.1,
                ask_price: ask.2,
                ask_size: ask.3,
            }
            .into()
        })
}

fn arb_trade() -> impl Strategy<Value = MarketEvent> {
    (
        (arb_text(), any::<i64>(), any::<i64>(), any::<i32>()),
        (any::<i16>(), arb_f64(), arb_f64(), arb_f64()),
        (any::<i32>(), arb_f64(), arb_f64(), any::<i32>()),
    )
        .prop_map(|(head, last, day)| {
            Trade {
                event_symbol: head.0,
                event_time: head.1,
                time_sequence: head.2,
                time_nano_part: head.3,
                exchange_code: last.0,
                price: last.1,
                change: last.2,
                size: last.3,
                day_id: day.0,
                day_volume: day.1,
                day_turnover: day.2,
                flags: day.3,
            }
            .into()
        })
}

fn arb_summary() -> impl Strategy<Value = MarketEvent> {
    (
        (arb_text(), any::<i64>(), any::<i32>()),
        (arb_f64(), arb_f64(), arb_f64(), arb_f64()),
        (any::<i32>(), arb_f64(), arb_f64(), any::<i64>(), any::<i32>()),
    )
        .prop_map(|(head, day, prev)| {
            Summary {
                event_symbol: head.0,
                event_time: head.1,
                day_id: head.2,
                day_open_price: day.0,
                day_high_price: day.1,
                day_low_price: day.2,
                day_close_price: day.3,
                prev_day_id: prev.0,
                prev_day_close_price: prev.1,
                prev_day_volume: prev.2,
                open_interest: prev.3,
                flags: prev.4,
            }
            .into()
        })
}

fn arb_order() -> impl Strategy<Value = MarketEvent> {
    (
        (arb_text(), any::<i64>(), any::<i32>(), any::<i64>()),
        (any::<i64>(), any::<i32>(), any::<i64>()),
        (arb_f64(), arb_f64(), arb_f64(), any::<i64>(), any::<i32>()),
        proptest::option::of(arb_text()),
    )
        .prop_map(|(head, ids, book, market_maker)| {
            Order {
                event_symbol: head.0,
                event_time: head.1,
                event_flags: head.2,
                index: head.3,
                time_sequence: ids.0,
                time_nano_part: ids.1,
                order_id: ids.2,
                price: book.0,
                size: book.1,
                executed_size: book.2,
                count: book.3,
                flags: book.4,
                market_maker,
            }
            .into()
        })
}

fn arb_candle() -> impl Strategy<Value = MarketEvent> {
    (
        (arb_candle_symbol(), any::<i64>(), any::<i32>(), any::<i64>()),
        (any::<i64>(), arb_f64(), arb_f64(), arb_f64(), arb_f64()),
        (arb_f64(), arb_f64(), arb_f64(), arb_f64()),
        (arb_f64(), arb_f64()),
    )
        .prop_map(|(head, ohlc, volume, extra)| {
            Candle {
                event_symbol: head.0.to_string(),
                event_time: head.1,
                event_flags: head.2,
                index: head.3,
                count: ohlc.0,
                open: ohlc.1,
                high: ohlc.2,
                low: ohlc.3,
                close: ohlc.4,
                volume: volume.0,
                vwap: volume.1,
                bid_volume: volume.2,
                ask_volume: volume.3,
                imp_volatility: extra.0,
                open_interest: extra.1,
            }
            .into()
        })
}

fn arb_event() -> impl Strategy<Value = MarketEvent> {
    prop_oneof![
        arb_quote(),
        arb_trade(),
        arb_summary(),
        arb_order(),
        arb_candle(),
    ]
}

/// Float fields compare by `Debug` so NaN matches NaN.
fn same_event(a: &MarketEvent, b: &MarketEvent) -> bool {
    format!("{a:?}") == format!("{b:?}")
}

proptest! {
    #[test]
    fn candle_text_form_parses_back(candle in arb_candle_symbol()) {
        let text = candle.to_string();
        prop_assert_eq!(CandleSymbol::parse(&text).unwrap(), candle);
    }

    #[test]
    fn candle_base_with_separator_never_builds(
        head in "[A-Z]{0,3}",
        tail in "[A-Z}=]{0,3}",
    ) {
        let base = format!("{head}{{={tail}");
        prop_assert!(CandleSymbol::new(base, None).is_err());
    }

    #[test]
    fn symbol_round_trips(symbol in arb_symbol()) {
        let encoded = encode_symbol(&symbol).unwrap();
        let decoded = unsafe { decode_symbol(encoded.as_ptr()) }.unwrap();
        prop_assert_eq!(decoded, symbol);
    }

    #[test]
    fn symbol_list_keeps_order(symbols in prop::collection::vec(arb_symbol(), 0..8)) {
        let list = EncodedSymbolList::encode(&symbols).unwrap();
        prop_assert_eq!(list.len(), symbols.len());
        let decoded = unsafe { decode_symbol_list(list.as_ptr()) }.unwrap();
        prop_assert_eq!(decoded, symbols);
    }

    #[test]
    fn event_round_trips(event in arb_event()) {
        let codecs = EventCodecRegistry::default();
        let encoded = codecs.encode(&event).unwrap();
        let decoded = unsafe { codecs.decode(encoded.as_ptr()) }.unwrap();
        prop_assert!(same_event(&decoded, &event), "{:?} != {:?}", decoded, event);
    }

    #[test]
    fn event_list_keeps_order(events in prop::collection::vec(arb_event(), 0..8)) {
        let codecs = EventCodecRegistry::default();
        let list = codecs.encode_list(&events).unwrap();
        prop_assert_eq!(list.len(), events.len());
        let decoded = unsafe { codecs.decode_list(list.as_ptr()) }.unwrap();
        prop_assert_eq!(decoded.len(), events.len());
        for (got, want) in decoded.iter().zip(&events) {
            prop_assert!(same_event(got, want), "{:?} != {:?}", got, want);
        }
    }
}
