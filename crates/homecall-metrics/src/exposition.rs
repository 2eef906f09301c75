use homecall_common::Metric;

pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Renders one sample line per metric, each carrying the given labels.
pub fn render_prometheus(metrics: &[Metric], labels: &[(&str, &str)]) -> String {
    let mut output = String::new();

    for metric in metrics {
        output.push_str("# HELP ");
        output.push_str(metric.name);
        output.push(' ');
        output.push_str(&escape_help(metric.help));
        output.push('\n');

        output.push_str("# TYPE ");
        output.push_str(metric.name);
        output.push(' ');
        output.push_str(metric.kind.as_prometheus_type());
        output.push('\n');

        output.push_str(&render_sample_line(metric.name, labels, metric.value));
    }

    output
}

fn render_sample_line(name: &str, labels: &[(&str, &str)], value: f64) -> String {
    let mut rendered = String::new();
    rendered.push_str(name);

    if !labels.is_empty() {
        rendered.push('{');
        for (index, (key, value)) in labels.iter().enumerate() {
            if index > 0 {
                rendered.push(',');
            }
            rendered.push_str(key);
            rendered.push_str("=\"");
            rendered.push_str(&escape_label_value(value));
            rendered.push('"');
        }
        rendered.push('}');
    }

    rendered.push(' ');
    rendered.push_str(&format_metric_value(value));
    rendered.push('\n');
    rendered
}

fn format_metric_value(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{value:.0}")
    } else {
        value.to_string()
    }
}

fn escape_help(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\n', "\\n")
}

fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('\n', "\\n")
        .replace('"', "\\\"")
}
