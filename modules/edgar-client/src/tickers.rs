// Ticker → CIK resolution from SEC's company_tickers JSON files.
//
// Two shapes are published:
//   company_tickers.json           {"0": {"cik_str": 320193, "ticker": "AAPL", "title": "..."}, ...}
//   company_tickers_exchange.json  {"fields": ["cik", "name", "ticker", ...], "data": [[...], ...]}

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::Value;

use crate::error::{EdgarError, Result};

/// Upper-cased ticker → zero-padded 10-digit CIK.
pub type TickerMap = BTreeMap<String, String>;

/// Read and parse a ticker file from disk.
pub fn load_ticker_map(path: &Path) -> Result<TickerMap> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| EdgarError::TickerMap(format!("{}: {e}", path.display())))?;
    parse_ticker_map(&raw)
}

/// Parse either published shape into a ticker map.
pub fn parse_ticker_map(raw: &str) -> Result<TickerMap> {
    let data: Value = serde_json::from_str(raw)?;

    let mut map = TickerMap::new();
    match &data {
        Value::Object(obj) if obj.get("data").is_some_and(Value::is_array) => {
            let fields: Vec<&str> = obj
                .get("fields")
                .and_then(Value::as_array)
                .map(|f| f.iter().filter_map(Value::as_str).collect())
                .unwrap_or_default();
            let rows = obj.get("data").and_then(Value::as_array).into_iter().flatten();

            let ticker_idx = fields.iter().position(|f| *f == "ticker");
            let cik_idx = fields.iter().position(|f| *f == "cik_str" || *f == "cik");

            for row in rows {
                match (row, ticker_idx, cik_idx) {
                    (Value::Array(cells), Some(t), Some(c)) => {
                        insert_row(&mut map, cells.get(t), cells.get(c));
                    }
                    (Value::Object(_), _, _) => insert_object(&mut map, row),
                    _ => {}
                }
            }
        }
        Value::Object(obj) => obj.values().for_each(|row| insert_object(&mut map, row)),
        Value::Array(rows) => rows.iter().for_each(|row| insert_object(&mut map, row)),
        _ => {}
    }

    if map.is_empty() {
        return Err(EdgarError::TickerMap(
            "unable to parse ticker file into a ticker→CIK map".to_string(),
        ));
    }
    Ok(map)
}

/// Normalize a CIK given as number or string into its 10-digit form.
pub fn normalize_cik(raw: &str) -> Result<String> {
    let digits = raw.trim();
    let value: u64 = digits
        .parse()
        .map_err(|_| EdgarError::InvalidCik(raw.to_string()))?;
    Ok(format!("{value:010}"))
}

fn insert_object(map: &mut TickerMap, row: &Value) {
    let Value::Object(obj) = row else {
        return;
    };
    let cik = obj.get("cik_str").or_else(|| obj.get("cik"));
    insert_row(map, obj.get("ticker"), cik);
}

fn insert_row(map: &mut TickerMap, ticker: Option<&Value>, cik: Option<&Value>) {
    let Some(ticker) = ticker.and_then(Value::as_str) else {
        return;
    };
    let cik = match cik {
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) => s.clone(),
        _ => return,
    };
    if let Ok(cik) = normalize_cik(&cik) {
        map.insert(ticker.trim().to_uppercase(), cik);
    }
}
