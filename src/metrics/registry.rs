use crate::metrics::types::GaugeVec;
use dashmap::DashMap;
use std::fmt::Write;
use std::sync::Arc;

/// Gauges keyed by metric name, created on first use and reused afterwards.
#[derive(Default)]
pub struct GaugeRegistry {
    gauges: DashMap<&'static str, Arc<GaugeVec>>,
}

impl GaugeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the gauge registered under `name`, registering it on first use.
    pub fn gauge(
        &self,
        name: &'static str,
        help: &'static str,
        label_names: &'static [&'static str],
    ) -> Arc<GaugeVec> {
        Arc::clone(
            self.gauges
                .entry(name)
                .or_insert_with(|| Arc::new(GaugeVec::new(name, help, label_names)))
                .value(),
        )
    }

    #[cfg(test)]
    pub fn get(&self, name: &str) -> Option<Arc<GaugeVec>> {
        self.gauges.get(name).map(|g| Arc::clone(g.value()))
    }

    pub fn len(&self) -> usize {
        self.gauges.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.gauges.is_empty()
    }

    /// Render every gauge in Prometheus text exposition format.
    pub fn render_prometheus(&self) -> String {
        let mut gauges: Vec<Arc<GaugeVec>> =
            self.gauges.iter().map(|g| Arc::clone(g.value())).collect();
        gauges.sort_by_key(|g| g.name());

        let mut output = String::new();
        for gauge in gauges {
            let series = gauge.series();
            if series.is_empty() {
                continue;
            }

            let name = gauge.name();
            let _ = writeln!(output, "# HELP {name} {}", gauge.help());
            let _ = writeln!(output, "# TYPE {name} {}", gauge.metric_type().as_str());
            for (values, value) in series {
                let labels = render_labels(gauge.label_names(), &values);
                let _ = writeln!(output, "{name}{labels} {value}");
            }
        }
        output
    }
}

fn render_labels(names: &[&str], values: &[String]) -> String {
    if names.is_empty() {
        return String::new();
    }

    let mut pairs: Vec<(&str, &String)> = names.iter().copied().zip(values).collect();
    pairs.sort_by_key(|(k, _)| *k);

    let label_str = pairs
        .into_iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
        .collect::<Vec<_>>()
        .join(",");

    format!("{{{label_str}}}")
}

fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
