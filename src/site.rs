// Site adapter module root
pub mod scripted_site;
pub mod site_trait;
pub mod types;
pub mod webdriver_site;

// Re-export commonly used items
pub use scripted_site::{CourtScript, ScriptedEngine, SlotScript};
pub use site_trait::{BrowserEngine, CourtPage};
pub use types::*;
pub use webdriver_site::WebDriverEngine;

use std::sync::Arc;

use crate::configuration::config::Config;
use crate::configuration::types::EngineKind;
use crate::site::types::CalendarSnapshot;

/// Builds the engine selected by `site.engine`.
///
/// The scripted engine gets one always-bookable court per configured court,
/// which makes it a dry-run stand-in for the real site.
pub fn engine_from_config(config: &Config) -> Arc<dyn BrowserEngine> {
    match config.site.engine {
        EngineKind::Webdriver => Arc::new(WebDriverEngine::new(config.site.clone(), &config.courts)),
        EngineKind::Scripted => {
            let engine = config.courts.iter().fold(ScriptedEngine::new(), |engine, court| {
                engine.with_court(
                    court.number,
                    CourtScript {
                        confirmation_id: Some(format!("DRYRUN-{}", court.number)),
                        calendar: CalendarSnapshot {
                            text: "Hoy Mañana".to_string(),
                            times: ["18:00", "19:00", "08:00", "09:00"]
                                .iter()
                                .map(|t| t.to_string())
                                .collect(),
                        },
                        ..CourtScript::default()
                    },
                )
            });
            Arc::new(engine)
        }
    }
}
