//! Sample component library.
//!
//! Built as a `cdylib` and loaded through the dlopen backend by the tests of
//! `hlt-components`. It registers two library-resident prototypes and
//! publishes one agent that adds a calibration component on activation.

use std::sync::Arc;

use hlt_components::prelude::*;
use serde_json::Value;

pub struct SampleComponent {
    id: &'static str,
    kind: ComponentType,
}

impl SampleComponent {
    pub const fn new(id: &'static str, kind: ComponentType) -> Self {
        Self { id, kind }
    }
}

impl Component for SampleComponent {
    fn component_id(&self) -> &str {
        self.id
    }

    fn component_type(&self) -> ComponentType {
        self.kind
    }

    fn spawn(&self) -> Option<Box<dyn Component>> {
        Some(Box::new(SampleComponent::new(self.id, self.kind)))
    }

    fn init(
        &mut self,
        _env: &ComponentEnvironment,
        env_param: &Value,
        _args: &[String],
    ) -> std::result::Result<(), InitError> {
        // A negative gain can not be calibrated away.
        match env_param.get("gain").and_then(Value::as_f64) {
            Some(gain) if gain < 0.0 => Err(InitError(22)),
            _ => Ok(()),
        }
    }
}

pub static SAMPLE_DIGITIZER: SampleComponent = SampleComponent::new("SampleDigitizer", ComponentType::Source);
pub static SAMPLE_WRITER: SampleComponent = SampleComponent::new("SampleWriter", ComponentType::Sink);
pub static SAMPLE_CALIBRATION: SampleComponent =
    SampleComponent::new("SampleCalibration", ComponentType::Processor);

/// Registers the calibration component when a handler activates it.
pub struct SampleAgent;

impl ModuleAgent for SampleAgent {
    fn name(&self) -> &str {
        "Sample"
    }

    fn activate_component_handler(&self, handler: &mut ComponentHandler) -> Result<()> {
        handler.register_component(&SAMPLE_CALIBRATION)
    }
}

hlt_components::export_components!(SAMPLE_DIGITIZER, SAMPLE_WRITER; agents: Arc::new(SampleAgent));
hlt_components::export_compile_info!("Oct 19 2026", "08:00:00");
