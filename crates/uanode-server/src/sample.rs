//! Sample address space.
//!
//! ```text
//! Objects
//! ├── MyDevice
//! │   ├── Temperature              ns=1;s=Temperature   10 + 10·sin(t/10 s)
//! │   ├── MyVariable2              static string
//! │   ├── MyVariable3              Double[3], read/write
//! │   └── Percentage Memory Used   ns=1;b=1020ffab      host memory
//! └── Yuber
//!     ├── Play                     ns=1;s=pardola       toggled by a timer
//!     └── SinePlay                 ns=1;i=1010          sin(phase), phase stepped by a timer
//! ```

use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::warn;

use uanode_core::{
    host, state_cell, AccessLevel, DataType, NodeId, NodeStore, StoreError, ValueSource, Variant,
    VariableSpec, APP_NAMESPACE,
};

use crate::config::DemoConfig;
use crate::timer::{TimerError, TimerSet};

pub const TOGGLE_TIMER: &str = "toggle-play";
pub const SINE_TIMER: &str = "sine-phase";

const MEMORY_NODE_ID: [u8; 4] = [0x10, 0x20, 0xff, 0xab];

#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Timer(#[from] TimerError),
}

/// Ids of the nodes created by [`build_sample_address_space`].
#[derive(Debug, Clone)]
pub struct SampleNodes {
    pub my_device: NodeId,
    pub temperature: NodeId,
    pub my_variable2: NodeId,
    pub my_variable3: NodeId,
    pub memory_used: NodeId,
    pub yuber: NodeId,
    pub play: NodeId,
    pub sine_play: NodeId,
}

pub fn temperature_at(now: DateTime<Utc>) -> f64 {
    let t = now.timestamp_millis() as f64 / 10_000.0;
    10.0 + 10.0 * t.sin()
}

/// Populate `store` with the sample nodes and start their timers.
///
/// Must be called from within a tokio runtime.
pub fn build_sample_address_space<S: NodeStore + ?Sized>(
    store: &mut S,
    timers: &TimerSet,
    demo: &DemoConfig,
) -> Result<SampleNodes, BuildError> {
    let objects = NodeId::objects_folder();

    let my_device = store.add_folder(&objects, "MyDevice")?;

    let temperature = store.add_variable(
        &my_device,
        VariableSpec::new(
            "Temperature",
            DataType::Double,
            ValueSource::computed(|| Ok(Variant::Double(temperature_at(Utc::now())))),
        )
        .with_node_id(NodeId::string(APP_NAMESPACE, "Temperature")),
    )?;

    let my_variable2 = store.add_variable(
        &my_device,
        VariableSpec::new(
            "MyVariable2",
            DataType::String,
            ValueSource::fixed("Learn Node-OPCUA ! Read https://leanpub.com/node-opcuabyexample"),
        ),
    )?;

    let my_variable3 = store.add_variable(
        &my_device,
        VariableSpec::new(
            "MyVariable3",
            DataType::Double,
            ValueSource::fixed(Variant::double_array(&[1.0, 2.0, 3.0])),
        )
        .array(3)
        .access(AccessLevel::READ_WRITE),
    )?;

    let memory_used = store.add_variable(
        &my_device,
        VariableSpec::new(
            "Percentage Memory Used",
            DataType::Double,
            ValueSource::computed(|| host::memory_used_percent().map(Variant::Double)),
        )
        .with_node_id(NodeId::opaque(APP_NAMESPACE, MEMORY_NODE_ID))
        .minimum_sampling_interval(1000),
    )?;

    let yuber = store.add_folder(&objects, "Yuber")?;

    let (mut toggle, playing) = state_cell(true);
    let play = store.add_variable(
        &yuber,
        VariableSpec::new(
            "Play",
            DataType::Boolean,
            ValueSource::computed(move || playing.get().map(Variant::Boolean)),
        )
        .with_node_id(NodeId::string(APP_NAMESPACE, "pardola")),
    )?;

    let (mut phase_writer, phase) = state_cell(0.0f64);
    let sine_play = store.add_variable(
        &yuber,
        VariableSpec::new(
            "SinePlay",
            DataType::Double,
            ValueSource::computed(move || phase.get().map(|p| Variant::Double(p.sin()))),
        )
        .with_node_id(NodeId::numeric(APP_NAMESPACE, 1010)),
    )?;

    timers.spawn(
        TOGGLE_TIMER,
        Duration::from_millis(demo.toggle_interval_ms),
        move || {
            if let Err(e) = toggle.update(|on| *on = !*on) {
                warn!("toggle timer: {}", e);
            }
        },
    )?;

    let step = demo.sine_phase_step;
    timers.spawn(
        SINE_TIMER,
        Duration::from_millis(demo.sine_phase_interval_ms),
        move || {
            if let Err(e) = phase_writer.update(|p| *p += step) {
                warn!("sine timer: {}", e);
            }
        },
    )?;

    Ok(SampleNodes {
        my_device,
        temperature,
        my_variable2,
        my_variable3,
        memory_used,
        yuber,
        play,
        sine_play,
    })
}
