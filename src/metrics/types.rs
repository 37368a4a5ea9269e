use dashmap::DashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Gauge,
}

impl MetricType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Gauge => "gauge",
        }
    }
}

/// A named gauge with a fixed label set and one value per label combination.
#[derive(Debug)]
pub struct GaugeVec {
    name: &'static str,
    help: &'static str,
    label_names: &'static [&'static str],
    values: DashMap<Vec<String>, f64>,
}

impl GaugeVec {
    pub fn new(
        name: &'static str,
        help: &'static str,
        label_names: &'static [&'static str],
    ) -> Self {
        Self {
            name,
            help,
            label_names,
            values: DashMap::new(),
        }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }

    pub const fn help(&self) -> &'static str {
        self.help
    }

    pub const fn metric_type(&self) -> MetricType {
        MetricType::Gauge
    }

    pub const fn label_names(&self) -> &'static [&'static str] {
        self.label_names
    }

    /// Set the series identified by `label_values`, given in `label_names` order.
    /// Calls with the wrong number of values are ignored.
    pub fn set(&self, label_values: &[&str], value: f64) {
        if label_values.len() != self.label_names.len() {
            return;
        }
        let key = label_values.iter().map(|v| (*v).to_string()).collect();
        self.values.insert(key, value);
    }

    #[cfg(test)]
    pub fn get(&self, label_values: &[&str]) -> Option<f64> {
        let key: Vec<String> = label_values.iter().map(|v| (*v).to_string()).collect();
        self.values.get(&key).map(|v| *v)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Snapshot of every series, sorted by label values.
    pub fn series(&self) -> Vec<(Vec<String>, f64)> {
        let mut series: Vec<(Vec<String>, f64)> = self
            .values
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        series.sort_by(|a, b| a.0.cmp(&b.0));
        series
    }
}
