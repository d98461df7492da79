// src/markets/fixtures.rs
//! Sample listings in raw vendor shape, served by `FixtureTransport` when
//! `MARKETS_MODE=fixture` and used throughout the tests.

use serde_json::{json, Value};

pub fn polymarket_raw() -> Vec<Value> {
    vec![
        json!({
            "id": "1",
            "question": "Will Bitcoin reach $100,000 by end of 2024?",
            "slug": "bitcoin-100k-2024",
            "volume": 1_000_000,
            "prices": [{ "price": 0.45 }],
            "end_date": "2024-12-31"
        }),
        json!({
            "id": "2",
            "question": "Will Trump win the 2024 presidential election?",
            "slug": "trump-2024-election",
            "volume": 5_000_000,
            "prices": [{ "price": 0.52 }],
            "end_date": "2024-11-05"
        }),
        json!({
            "id": "3",
            "question": "Will the S&P 500 reach 6000 by end of 2024?",
            "slug": "sp500-6000-2024",
            "volume": 2_000_000,
            "prices": [{ "price": 0.35 }],
            "end_date": "2024-12-31"
        }),
    ]
}

pub fn kalshi_raw() -> Vec<Value> {
    vec![
        json!({
            "ticker": "FED-DEC24",
            "title": "Will the Fed cut rates in December 2024?",
            "volume": 500_000,
            "last_price": 0.75,
            "close_time": "2024-12-31",
            "status": "open"
        }),
        json!({
            "ticker": "DEMS-HOUSE-24",
            "title": "Will Democrats control the House after 2024?",
            "volume": 800_000,
            "last_price": 0.42,
            "close_time": "2024-11-05",
            "status": "open"
        }),
        json!({
            "ticker": "RECESSION-24",
            "title": "Will there be a recession in 2024?",
            "volume": 1_200_000,
            "last_price": 0.25,
            "close_time": "2024-12-31",
            "status": "open"
        }),
    ]
}
