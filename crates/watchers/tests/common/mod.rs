#![allow(dead_code)]

use std::sync::Arc;

use kube::{core::ApiResource, CustomResource};
use parking_lot::Mutex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use skiff_core::ProcessorConfig;
use skiff_watchers::{EventProcessor, Mirror, MirrorStore, StaticProbe};

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(group = "test.skiff.dev", version = "v1", kind = "Widget", plural = "widgets", namespaced)]
pub struct WidgetSpec {
    pub size: u32,
}

pub fn widget(ns: &str, name: &str, size: u32) -> Widget {
    let mut w = Widget::new(name, WidgetSpec { size });
    w.metadata.namespace = Some(ns.to_string());
    w
}

pub fn widget_resource() -> ApiResource {
    ApiResource::erase::<Widget>(&())
}

/// Client pointed at an address nothing listens on; tests never reach the network.
pub fn offline_client() -> kube::Client {
    let config = kube::Config::new("http://127.0.0.1:6443".parse().expect("valid uri"));
    kube::Client::try_from(config).expect("client")
}

pub fn processor_with(probe: StaticProbe) -> Arc<EventProcessor> {
    processor_with_config(ProcessorConfig::default(), probe)
}

pub fn processor_with_config(config: ProcessorConfig, probe: StaticProbe) -> Arc<EventProcessor> {
    Arc::new(EventProcessor::with_probe("test", offline_client(), config, Arc::new(probe)))
}

pub fn processor() -> Arc<EventProcessor> {
    processor_with(StaticProbe::none())
}

/// A widget store plus the same store viewed as a mirror.
pub fn widget_mirror() -> (Arc<MirrorStore<Widget>>, Arc<dyn Mirror<Widget>>) {
    let store = Arc::new(MirrorStore::<Widget>::new("Widget"));
    let mirror: Arc<dyn Mirror<Widget>> = store.clone();
    (store, mirror)
}

pub type Calls = Arc<Mutex<Vec<(String, Option<u32>)>>>;

/// Handler that records `(key, size)` for every dispatch and succeeds.
pub fn recorder(
    calls: &Calls,
) -> impl Fn(String, Option<Arc<Widget>>) -> futures::future::Ready<anyhow::Result<()>> + Send + Sync + 'static {
    let calls = Arc::clone(calls);
    move |key, obj| {
        calls.lock().push((key, obj.map(|w| w.spec.size)));
        futures::future::ready(Ok(()))
    }
}
