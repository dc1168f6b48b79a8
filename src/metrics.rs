use prometheus::{proto::MetricFamily, GaugeVec, IntCounterVec, Opts};
use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Prometheus(#[from] prometheus::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    GaugeVec,
    IntCounterVec,
}

#[derive(Debug, Clone)]
pub struct MetricConfig<'a> {
    pub kind: Kind,
    pub name: &'a str,
    pub help: &'a str,
    pub label_names: &'a [&'a str],
}

pub type SharedRegistrar = Arc<Registrar>;

/// Named Prometheus metrics over a single registry.
#[derive(Clone, Default)]
pub struct Registrar {
    registry: prometheus::Registry,
    int_counters_vecs: Arc<RwLock<HashMap<String, IntCounterVec>>>,
    gauges_vecs: Arc<RwLock<HashMap<String, GaugeVec>>>,
}

impl std::fmt::Debug for Registrar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registrar")
            .field("int_counters_vecs", &format!("{:?}", self.int_counters_vecs))
            .field("gauges_vecs", &format!("{:?}", self.gauges_vecs))
            .finish()
    }
}

pub trait Registry {
    fn with_metric_configs<'a>(&self, metrics: &'a [MetricConfig<'a>]) -> Result<(), Error>;
    fn with_metric_config<'a>(&self, metric: &'a MetricConfig<'a>) -> Result<(), Error>;
}

impl Registry for Registrar {
    fn with_metric_config<'a>(&self, metric: &'a MetricConfig<'a>) -> Result<(), Error> {
        log::info!(
            "Attempting to register metric with name {:?} and labels {:?}",
            metric.name,
            metric.label_names
        );
        let opts = Opts::new(metric.name, metric.help);

        let registered = match metric.kind {
            Kind::GaugeVec => {
                let gauge = GaugeVec::new(opts, metric.label_names)?;
                self.registry.register(Box::new(gauge.clone())).map(|()| {
                    if let Ok(mut gauges) = self.gauges_vecs.write() {
                        gauges.insert(metric.name.to_string(), gauge);
                    }
                })
            }
            Kind::IntCounterVec => {
                let counter = IntCounterVec::new(opts, metric.label_names)?;
                self.registry.register(Box::new(counter.clone())).map(|()| {
                    if let Ok(mut counters) = self.int_counters_vecs.write() {
                        counters.insert(metric.name.to_string(), counter);
                    }
                })
            }
        };

        match registered {
            Ok(()) => Ok(()),
            Err(prometheus::Error::AlreadyReg) => {
                log::info!("Metric {:?} is already registered.", metric.name);
                Ok(())
            }
            Err(e) => {
                log::error!("Failed to register metric {:?}. {:?}", metric.name, e);
                Err(Error::Prometheus(e))
            }
        }
    }

    fn with_metric_configs<'a>(&self, metrics: &'a [MetricConfig<'a>]) -> Result<(), Error> {
        for metric in metrics {
            self.with_metric_config(metric)?;
        }
        Ok(())
    }
}

impl Registrar {
    pub fn new(registry: prometheus::Registry) -> Self {
        Self {
            registry,
            ..Default::default()
        }
    }

    pub fn registry(&self) -> &prometheus::Registry {
        &self.registry
    }

    pub fn gather(&self) -> Vec<MetricFamily> {
        self.registry.gather()
    }

    // Unknown keys are ignored.
    pub fn inc_int_counter_vec(&self, key: &str, labels: &[&str]) {
        self.inc_by_int_counter_vec(key, labels, 1)
    }

    pub fn inc_by_int_counter_vec(&self, key: &str, labels: &[&str], value: u64) {
        let Ok(counters) = self.int_counters_vecs.read() else {
            return;
        };
        if let Some(counter) = counters.get(key) {
            counter.with_label_values(labels).inc_by(value)
        }
    }

    pub fn set_gauge_vec(&self, key: &str, labels: &[&str], value: f64) {
        let Ok(gauges) = self.gauges_vecs.read() else {
            return;
        };
        if let Some(gauge) = gauges.get(key) {
            gauge.with_label_values(labels).set(value)
        }
    }
}
