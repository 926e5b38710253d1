//! Prometheus exposition text rendering
//!
//! Turns collected metric families into text format version 0.0.4. Sample
//! label names are the family's names followed by any per-sample extras
//! (`le`, `quantile`), matched positionally against the sample's values.

use crate::types::{format_value, MetricFamily};

/// Render metric families as exposition text
///
/// Families render in the order given; within a family, samples keep
/// collection order.
pub fn render_text(families: &[MetricFamily]) -> String {
    let mut out = String::new();
    for family in families {
        out.push_str("# HELP ");
        out.push_str(&family.name);
        out.push(' ');
        out.push_str(&escape_help(&family.help));
        out.push('\n');

        out.push_str("# TYPE ");
        out.push_str(&family.name);
        out.push(' ');
        out.push_str(family.metric_type.as_str());
        out.push('\n');

        for sample in &family.samples {
            out.push_str(&sample.name);

            let names = family
                .label_names
                .iter()
                .chain(sample.label_names.iter());
            let mut pairs = names.zip(sample.label_values.iter()).peekable();
            if pairs.peek().is_some() {
                out.push('{');
                let mut first = true;
                for (name, value) in pairs {
                    if !first {
                        out.push(',');
                    }
                    first = false;
                    out.push_str(name);
                    out.push_str("=\"");
                    out.push_str(&escape_label_value(value));
                    out.push('"');
                }
                out.push('}');
            }

            out.push(' ');
            out.push_str(&format_value(sample.value));
            out.push('\n');
        }
    }
    out
}

fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}

fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MetricType, Sample};

    fn owned(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_render_counter_family() {
        let family = MetricFamily {
            name: "requests_total".into(),
            help: "Total requests".into(),
            metric_type: MetricType::Counter,
            label_names: owned(&["route"]),
            samples: vec![
                Sample {
                    name: "requests_total".into(),
                    label_names: vec![],
                    label_values: owned(&["api"]),
                    value: 7.0,
                },
                Sample {
                    name: "requests_total".into(),
                    label_names: vec![],
                    label_values: owned(&["web"]),
                    value: 2.5,
                },
            ],
        };

        assert_eq!(
            render_text(&[family]),
            "# HELP requests_total Total requests\n\
             # TYPE requests_total counter\n\
             requests_total{route=\"api\"} 7\n\
             requests_total{route=\"web\"} 2.5\n"
        );
    }

    #[test]
    fn test_render_unlabeled_sample() {
        let family = MetricFamily {
            name: "up".into(),
            help: "Up".into(),
            metric_type: MetricType::Gauge,
            label_names: vec![],
            samples: vec![Sample {
                name: "up".into(),
                label_names: vec![],
                label_values: vec![],
                value: 1.0,
            }],
        };

        let text = render_text(&[family]);
        assert!(text.contains("up 1\n"));
        assert!(!text.contains("up{"));
    }

    #[test]
    fn test_render_histogram_le_label() {
        let family = MetricFamily {
            name: "latency".into(),
            help: "Latency".into(),
            metric_type: MetricType::Histogram,
            label_names: owned(&["route"]),
            samples: vec![
                Sample {
                    name: "latency_bucket".into(),
                    label_names: owned(&["le"]),
                    label_values: owned(&["api", "50"]),
                    value: 1.0,
                },
                Sample {
                    name: "latency_bucket".into(),
                    label_names: owned(&["le"]),
                    label_values: owned(&["api", "+Inf"]),
                    value: 4.0,
                },
                Sample {
                    name: "latency_count".into(),
                    label_names: vec![],
                    label_values: owned(&["api"]),
                    value: 4.0,
                },
                Sample {
                    name: "latency_sum".into(),
                    label_names: vec![],
                    label_values: owned(&["api"]),
                    value: 5190.0,
                },
            ],
        };

        let text = render_text(&[family]);
        assert!(text.contains("latency_bucket{route=\"api\",le=\"50\"} 1\n"));
        assert!(text.contains("latency_bucket{route=\"api\",le=\"+Inf\"} 4\n"));
        assert!(text.contains("latency_count{route=\"api\"} 4\n"));
        assert!(text.contains("latency_sum{route=\"api\"} 5190\n"));
    }

    #[test]
    fn test_escaping() {
        let family = MetricFamily {
            name: "odd".into(),
            help: "line one\nline \\two".into(),
            metric_type: MetricType::Gauge,
            label_names: owned(&["path"]),
            samples: vec![Sample {
                name: "odd".into(),
                label_names: vec![],
                label_values: owned(&["C:\\dir \"x\"\n"]),
                value: 1.0,
            }],
        };

        let text = render_text(&[family]);
        assert!(text.contains("# HELP odd line one\\nline \\\\two\n"));
        assert!(text.contains("odd{path=\"C:\\\\dir \\\"x\\\"\\n\"} 1\n"));
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(render_text(&[]), "");
    }
}
