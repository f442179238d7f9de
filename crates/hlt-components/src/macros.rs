//! Macros for component libraries.
//!
//! A library built as a `cdylib` uses these to export the optional entry
//! points the loader looks for.

/// Export the registration entry point of a component library.
///
/// Every listed item must be a `static` implementing
/// [`Component`](crate::component::Component). The prototypes are
/// registered as library-resident, so the handler never destroys them.
/// Agents listed after `agents:` are published to the handler's agent list.
///
/// # Example
///
/// ```rust,ignore
/// static CLUSTER_FINDER: ClusterFinder = ClusterFinder::new();
/// static TRACKER: Tracker = Tracker::new();
///
/// hlt_components::export_components!(CLUSTER_FINDER, TRACKER);
/// ```
#[macro_export]
macro_rules! export_components {
    ($($component:path),* ; agents: $($agent:expr),* $(,)?) => {
        #[no_mangle]
        pub fn hlt_component_registration(ctx: &mut $crate::registration::RegistrationContext<'_>) {
            $(
                ctx.schedule_register(&$component);
            )*
            $(
                ctx.register_agent($agent);
            )*
        }
    };
    ($($component:path),* $(,)?) => {
        $crate::export_components!($($component),* ; agents:);
    };
}

/// Export the `CompileInfo` entry point with the given build date and time.
///
/// # Example
///
/// ```rust,ignore
/// hlt_components::export_compile_info!("Apr 26 2007", "10:15:00");
/// ```
#[macro_export]
macro_rules! export_compile_info {
    ($date:literal, $time:literal $(,)?) => {
        /// Report the build date and time of this library.
        ///
        /// # Safety
        ///
        /// Both arguments must be null or valid for writes.
        #[no_mangle]
        #[allow(non_snake_case)]
        pub unsafe extern "C" fn CompileInfo(
            date: *mut *const ::std::ffi::c_char,
            time: *mut *const ::std::ffi::c_char,
        ) {
            const DATE: &str = concat!($date, "\0");
            const TIME: &str = concat!($time, "\0");
            if !date.is_null() {
                unsafe { *date = DATE.as_ptr().cast() };
            }
            if !time.is_null() {
                unsafe { *time = TIME.as_ptr().cast() };
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::Value;

    use crate::agent::{AgentList, ModuleAgent};
    use crate::component::{Component, ComponentEnvironment, ComponentType, InitError};
    use crate::handler::ComponentHandler;
    use crate::loader::{BuildInfo, CompileInfoFn, RawSymbol};
    use crate::registration::{test_support, RegistrationContext, ScheduleQueue};

    struct Stage(&'static str);

    impl Component for Stage {
        fn component_id(&self) -> &str {
            self.0
        }

        fn component_type(&self) -> ComponentType {
            ComponentType::Processor
        }

        fn spawn(&self) -> Option<Box<dyn Component>> {
            Some(Box::new(Stage(self.0)))
        }

        fn init(&mut self, _: &ComponentEnvironment, _: &Value, _: &[String]) -> Result<(), InitError> {
            Ok(())
        }
    }

    struct QuietAgent;

    impl ModuleAgent for QuietAgent {
        fn name(&self) -> &str {
            "Quiet"
        }

        fn activate_component_handler(&self, _: &mut ComponentHandler) -> crate::Result<()> {
            Ok(())
        }
    }

    static CLUSTER_FINDER: Stage = Stage("ClusterFinder");
    static TRACKER: Stage = Stage("Tracker");

    crate::export_components!(CLUSTER_FINDER, TRACKER; agents: Arc::new(QuietAgent));
    crate::export_compile_info!("Apr 26 2007", "10:15:00");

    #[test]
    fn test_exported_registration() {
        let _guard = test_support::serial();
        let agents = AgentList::new();
        let mut queue = ScheduleQueue::new();
        {
            let mut ctx = RegistrationContext::enter(&mut queue, &agents, "libSelf.so").unwrap();
            hlt_component_registration(&mut ctx);
        }
        assert_eq!(queue.pending_ids(), vec!["ClusterFinder", "Tracker"]);
        assert_eq!(agents.len(), 1);
    }

    #[test]
    fn test_exported_compile_info() {
        let symbol = RawSymbol::from_fn_ptr(CompileInfo as CompileInfoFn as *const ()).unwrap();
        let info = unsafe { BuildInfo::from_symbol(symbol) };
        assert_eq!(info.date, "Apr 26 2007");
        assert_eq!(info.time, "10:15:00");
    }
}
