//! Vega-Lite chart documents for training metrics.
//!
//! Charts are plain JSON specs. Rendering is left to whatever consumes them.

use crate::error::Result;
use crate::identifiers::RunContext;
use crate::paths::provision_path;
use serde_json::{Value, json};
use std::path::PathBuf;

const SCHEMA: &str = "https://vega.github.io/schema/vega-lite/v4.json";
const SELECTION: &str = "nearest";

/// A line layer of `y` over `x`, one line per distinct `color`.
pub fn line_layer(x: &str, y: &str, color: &str) -> Value {
    json!({
        "mark": "line",
        "encoding": {
            "x": {"field": x, "type": "quantitative"},
            "y": {"field": y, "type": "quantitative"},
            "color": {"field": color, "type": "nominal"}
        }
    })
}

fn with_mark(base: &Value, mark: Value) -> Value {
    let mut layer = base.clone();
    layer["mark"] = mark;
    layer
}

/// Layer `base` with a nearest-point hover: invisible selectors, highlighted
/// points, a vertical rule and a text label showing `text`.
pub fn hover_chart(
    source: &[Value],
    x: &str,
    base: &Value,
    width: u32,
    height: u32,
    text: &str,
) -> Value {
    let selectors = json!({
        "mark": "point",
        "selection": {
            SELECTION: {
                "type": "single",
                "nearest": true,
                "on": "mouseover",
                "fields": [x],
                "empty": "none"
            }
        },
        "encoding": {
            "x": {"field": x, "type": "quantitative"},
            "opacity": {"value": 0}
        }
    });

    let mut points = with_mark(base, json!("point"));
    points["encoding"]["opacity"] = json!({
        "condition": {"selection": SELECTION, "value": 1},
        "value": 0
    });

    let mut label = with_mark(base, json!({"type": "text", "align": "left", "dx": 5, "dy": -5}));
    label["encoding"]["text"] = json!({
        "condition": {"selection": SELECTION, "field": text, "type": "quantitative"},
        "value": " "
    });

    let rule = json!({
        "mark": {"type": "rule", "color": "gray"},
        "encoding": {"x": {"field": x, "type": "quantitative"}},
        "transform": [{"filter": {"selection": SELECTION}}]
    });

    json!({
        "$schema": SCHEMA,
        "data": {"values": source},
        "width": width,
        "height": height,
        "layer": [base, selectors, points, rule, label]
    })
}

/// 600×400 line chart of `metric` per epoch, one line per run `name`.
pub fn metric_chart(source: &[Value], metric: &str) -> Value {
    let line = line_layer("epoch", metric, "name");
    hover_chart(source, "epoch", &line, 600, 400, metric)
}

/// Write a chart to a path templated with run identifiers.
pub fn save_chart(ctx: &RunContext, chart: &Value, template: &str) -> Result<PathBuf> {
    let path = provision_path(ctx, template)?;
    std::fs::write(&path, serde_json::to_string_pretty(chart)?)?;
    Ok(path)
}
