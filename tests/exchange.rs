use chrono::{TimeZone, Timelike, Utc};
use serde_json::json;
use std::collections::BTreeSet;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};
use coinharvest::exchange::{ExchangeAdapter, ExchangeDefinition, PairTarget};
use coinharvest::types::{CurrencyPair, Interval, RequestKind, Value};

fn adapter(server: &MockServer, requests: serde_json::Value) -> ExchangeAdapter {
    let definition = json!({
        "name": "Mockex",
        "api_url": format!("{}/api/", server.uri()),
        "timeout_secs": 5,
        "ping": "ping",
        "historic_rates": {"min_rows": 2, "max_rows": 100},
        "requests": requests,
    });
    let definition = ExchangeDefinition::from_json(&definition.to_string()).unwrap();
    ExchangeAdapter::new(&definition).unwrap()
}

fn pair(first: &str, second: &str) -> CurrencyPair {
    CurrencyPair::new("mockex", first, second).unwrap()
}

fn targets(pairs: &[(&str, &str)]) -> Vec<PairTarget> {
    pairs.iter().map(|(f, s)| PairTarget::new(pair(f, s))).collect()
}

fn ticker_requests() -> serde_json::Value {
    json!({
        "tickers": {
            "request": {
                "template": "ticker/{currency_pair}",
                "pair_template": {"template": "{first}{second}", "lower_case": true}
            },
            "response": {
                "mapping": [
                    {"key": "last_price", "path": ["last"], "type": ["str", "float"]},
                    {"key": "daily_volume", "path": ["volume"], "type": ["str", "float"]}
                ]
            }
        }
    })
}

#[tokio::test]
async fn requests_each_pair_and_formats_one_record_per_pair() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/ticker/btcusd"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"last": "100.5", "volume": "12"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/ticker/ethusd"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"last": "20.25", "volume": "3"})))
        .mount(&server)
        .await;

    let adapter = adapter(&server, ticker_requests());
    let bundle = adapter
        .request(RequestKind::Tickers, &targets(&[("btc", "usd"), ("eth", "usd")]), Interval::Days)
        .await
        .unwrap();

    assert_eq!(bundle.exchange, "mockex");
    assert_eq!(bundle.responses.len(), 2);
    assert_eq!(bundle.request_time.nanosecond(), 0);
    assert!(!bundle.is_failure());

    let records = adapter.format(&bundle, &BTreeSet::new()).unwrap();
    assert_eq!(records.len(), 2);

    let btc = records.iter().find(|r| r.pair == Some(pair("BTC", "USD"))).unwrap();
    assert_eq!(btc.field("last_price"), Some(&Value::Float(100.5)));
    assert_eq!(btc.field("daily_volume"), Some(&Value::Float(12.0)));
    assert_eq!(btc.start_time, bundle.request_time);
}

#[tokio::test]
async fn failing_pair_does_not_abort_the_batch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/ticker/btcusd"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"last": "100.5", "volume": "12"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/ticker/ethusd"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/ticker/ltcusd"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let adapter = adapter(&server, ticker_requests());
    let bundle = adapter
        .request(
            RequestKind::Tickers,
            &targets(&[("btc", "usd"), ("eth", "usd"), ("ltc", "usd")]),
            Interval::Days,
        )
        .await
        .unwrap();

    let empty: Vec<_> = bundle.responses.iter().filter(|r| r.body.is_none()).collect();
    assert_eq!(empty.len(), 2);
    assert!(!bundle.is_failure());

    let records = adapter.format(&bundle, &BTreeSet::new()).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].pair, Some(pair("BTC", "USD")));
}

#[tokio::test]
async fn every_pair_failing_marks_the_bundle_failed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let adapter = adapter(&server, ticker_requests());
    let bundle = adapter
        .request(RequestKind::Tickers, &targets(&[("btc", "usd")]), Interval::Days)
        .await
        .unwrap();

    assert!(bundle.is_failure());
}

#[tokio::test]
async fn pair_less_response_derives_and_filters_pairs() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tickers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"base": "BTC", "quote": "USD", "last": "100"},
            {"base": "ETH", "quote": "USD", "last": "20"},
            {"base": "DOGE", "quote": "USD", "last": "0.1"}
        ])))
        .mount(&server)
        .await;

    let adapter = adapter(
        &server,
        json!({
            "tickers": {
                "request": {"template": "tickers"},
                "response": {
                    "mapping": [
                        {"key": "currency_pair_first", "path": [[], "base"], "type": ["str"]},
                        {"key": "currency_pair_second", "path": [[], "quote"], "type": ["str"]},
                        {"key": "last_price", "path": [[], "last"], "type": ["str", "float"]}
                    ]
                }
            }
        }),
    );

    let bundle = adapter.request(RequestKind::Tickers, &[], Interval::Days).await.unwrap();
    assert_eq!(bundle.responses.len(), 1);
    assert!(bundle.responses[0].pair.is_none());

    let requested: BTreeSet<_> = [pair("BTC", "USD"), pair("ETH", "USD")].into_iter().collect();
    let records = adapter.format(&bundle, &requested).unwrap();

    let pairs: BTreeSet<_> = records.iter().filter_map(|r| r.pair.clone()).collect();
    assert_eq!(pairs, requested);
    let eth = records.iter().find(|r| r.pair == Some(pair("ETH", "USD"))).unwrap();
    assert_eq!(eth.field("last_price"), Some(&Value::Float(20.0)));
}

#[tokio::test]
async fn order_book_levels_are_sorted_and_positioned() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/book/btc_usd"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "bids": [["99", "1"], ["100", "2"], ["98", "3"]],
            "asks": [["103", "1"], ["101", "2"]]
        })))
        .mount(&server)
        .await;

    let adapter = adapter(
        &server,
        json!({
            "order_books": {
                "request": {
                    "template": "book/{currency_pair}",
                    "pair_template": {"template": "{first}_{second}", "lower_case": true}
                },
                "response": {
                    "mapping": [
                        {"key": "bids_price", "path": ["bids", [], 0], "type": ["str", "float"]},
                        {"key": "bids_amount", "path": ["bids", [], 1], "type": ["str", "float"]},
                        {"key": "asks_price", "path": ["asks", [], 0], "type": ["str", "float"]},
                        {"key": "asks_amount", "path": ["asks", [], 1], "type": ["str", "float"]}
                    ]
                }
            }
        }),
    );

    let bundle = adapter
        .request(RequestKind::OrderBooks, &targets(&[("btc", "usd")]), Interval::Days)
        .await
        .unwrap();
    let mut records = adapter.format(&bundle, &BTreeSet::new()).unwrap();
    records.sort_by_key(|r| r.field("position").and_then(Value::as_i64));

    let bids: Vec<_> = records.iter().map(|r| r.field("bids_price").cloned()).collect();
    assert_eq!(
        bids,
        vec![Some(Value::Float(100.0)), Some(Value::Float(99.0)), Some(Value::Float(98.0))]
    );
    let asks: Vec<_> = records.iter().map(|r| r.field("asks_price").cloned()).collect();
    assert_eq!(asks, vec![Some(Value::Float(101.0)), Some(Value::Float(103.0)), None]);
    assert_eq!(records[0].field("bids_amount"), Some(&Value::Float(2.0)));
    assert_eq!(records[2].field("position"), Some(&Value::Int(2)));
}

#[tokio::test]
async fn historic_request_carries_interval_and_cursor_params() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/ohlc/btcusd"))
        .and(query_param("step", "3600"))
        .and(query_param("end", "1609459200"))
        .and(query_param("limit", "100"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"ohlc": [
                {"timestamp": "1609455600", "close": "29000.5"},
                {"timestamp": "1609452000", "close": "28900"}
            ]}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = adapter(
        &server,
        json!({
            "historic_rates": {
                "request": {
                    "template": "ohlc/{currency_pair}",
                    "pair_template": {"template": "{first}{second}", "lower_case": true},
                    "params": {
                        "step": {"allowed": {"hours": 3600, "days": 86400}},
                        "limit": {"default": 100},
                        "end": {"function": "last_timestamp"},
                        "exclude": {"default": "none", "required": false}
                    }
                },
                "response": {
                    "mapping": [
                        {"key": "time", "path": ["data", "ohlc", [], "timestamp"], "type": ["str", "int", "utcfromtimestamp"]},
                        {"key": "close", "path": ["data", "ohlc", [], "close"], "type": ["str", "float"]}
                    ]
                }
            }
        }),
    );

    let mut target = PairTarget::new(pair("BTC", "USD"));
    target.cursor = Some(Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap());

    // Minutes are not offered, so the next coarser interval is requested
    assert_eq!(adapter.effective_interval(RequestKind::HistoricRates, Interval::Minutes), Interval::Hours);

    let bundle = adapter
        .request(RequestKind::HistoricRates, &[target], Interval::Minutes)
        .await
        .unwrap();
    assert_eq!(bundle.interval, Interval::Hours);

    let records = adapter.format(&bundle, &BTreeSet::new()).unwrap();
    assert_eq!(records.len(), 2);
    let oldest = records.iter().filter_map(|r| r.time()).min().unwrap();
    assert_eq!(oldest, Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap() - chrono::Duration::hours(2));
}

#[tokio::test]
async fn rate_limited_call_is_retried_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/ticker/btcusd"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/ticker/btcusd"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"last": "1", "volume": "1"})))
        .mount(&server)
        .await;

    let adapter = adapter(&server, ticker_requests());
    let bundle = adapter
        .request(RequestKind::Tickers, &targets(&[("btc", "usd")]), Interval::Days)
        .await
        .unwrap();

    assert!(bundle.responses[0].body.is_some());
}

#[tokio::test]
async fn connectivity_probe_reports_reachability() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/ping"))
        .respond_with(ResponseTemplate::new(200).set_body_string("pong"))
        .mount(&server)
        .await;

    let adapter = adapter(&server, ticker_requests());
    assert_eq!(adapter.test_connection(None).await, ("mockex".to_string(), true));

    server.reset().await;
    Mock::given(method("GET"))
        .and(path("/api/ping"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    assert_eq!(adapter.test_connection(None).await, ("mockex".to_string(), false));
}

#[tokio::test]
async fn unsupported_kind_is_an_error() {
    let server = MockServer::start().await;
    let adapter = adapter(&server, ticker_requests());

    assert!(adapter.supports(RequestKind::Tickers));
    assert!(!adapter.supports(RequestKind::Trades));
    assert!(adapter.request(RequestKind::Trades, &[], Interval::Days).await.is_err());
}
