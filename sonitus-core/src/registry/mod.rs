//! Component registry — the configuration-load wiring pass.
//!
//! `ComponentRegistry::build` turns a declarative [`Document`] into the live
//! object graph: one [`AudioDetector`] per declaration, constructed first and
//! then bound to its microphone through the post-construction setter. The
//! registry owns every component; detectors hold their microphone by
//! identifier only.

use crate::config::{DetectorConfig, Document, ResolvedMicrophone};
use crate::error::{Result, SonitusError};

/// A registered microphone instance — the wiring target detectors bind to.
#[derive(Debug, Clone)]
pub struct MicrophoneHandle {
    id: String,
    device: Option<String>,
}

impl MicrophoneHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Preferred OS input device name, when the declaration named one.
    pub fn device(&self) -> Option<&str> {
        self.device.as_deref()
    }
}

impl From<ResolvedMicrophone> for MicrophoneHandle {
    fn from(m: ResolvedMicrophone) -> Self {
        Self {
            id: m.id,
            device: m.device,
        }
    }
}

/// An audio detector component.
///
/// Construction does not require a microphone; binding happens through
/// [`AudioDetector::set_microphone`], which may also rebind later. The
/// reference is non-owning — just the identifier of a registered microphone.
#[derive(Debug, Clone)]
pub struct AudioDetector {
    id: String,
    microphone: Option<String>,
    config: DetectorConfig,
}

impl AudioDetector {
    pub fn new(id: impl Into<String>, config: DetectorConfig) -> Self {
        Self {
            id: id.into(),
            microphone: None,
            config,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Bind (or rebind) the microphone this detector listens to.
    pub fn set_microphone(&mut self, microphone: impl Into<String>) {
        self.microphone = Some(microphone.into());
    }

    /// Identifier of the bound microphone, if any.
    pub fn microphone(&self) -> Option<&str> {
        self.microphone.as_deref()
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }
}

/// The wired object graph produced from one configuration document.
#[derive(Debug, Default)]
pub struct ComponentRegistry {
    microphones: Vec<MicrophoneHandle>,
    detectors: Vec<AudioDetector>,
}

impl ComponentRegistry {
    /// Validate `document` and construct the component graph.
    ///
    /// Each detector declaration yields exactly one registered detector whose
    /// microphone reference equals the declared microphone's identifier.
    ///
    /// # Errors
    /// Any validation failure from [`Document::resolve`]; nothing is
    /// registered on error.
    pub fn build(document: &Document) -> Result<Self> {
        let resolved = document.resolve()?;

        let mut registry = Self::default();
        for microphone in resolved.microphones {
            registry.microphones.push(microphone.into());
        }

        for decl in resolved.detectors {
            let mut detector = AudioDetector::new(decl.id, decl.config);
            detector.set_microphone(decl.microphone);
            registry.register(detector)?;
        }

        Ok(registry)
    }

    /// Register a detector. Its microphone reference must name a registered
    /// microphone.
    pub fn register(&mut self, detector: AudioDetector) -> Result<()> {
        let Some(mic) = detector.microphone() else {
            return Err(SonitusError::UnboundMicrophone {
                detector: detector.id().to_string(),
            });
        };
        if self.microphone(mic).is_none() {
            return Err(SonitusError::UnknownMicrophone {
                detector: detector.id().to_string(),
                microphone: mic.to_string(),
            });
        }
        if self.detector(detector.id()).is_some() {
            return Err(SonitusError::DuplicateId {
                id: detector.id().to_string(),
            });
        }
        self.detectors.push(detector);
        Ok(())
    }

    pub fn microphones(&self) -> &[MicrophoneHandle] {
        &self.microphones
    }

    pub fn detectors(&self) -> &[AudioDetector] {
        &self.detectors
    }

    pub fn microphone(&self, id: &str) -> Option<&MicrophoneHandle> {
        self.microphones.iter().find(|m| m.id() == id)
    }

    pub fn detector(&self, id: &str) -> Option<&AudioDetector> {
        self.detectors.iter().find(|d| d.id() == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Document;

    #[test]
    fn build_wires_one_detector_to_declared_microphone() {
        let document = Document::from_json_str(
            r#"{
              "microphones": [{ "id": "mic_kitchen" }],
              "detectors": [{ "id": "detect_audio_main" }]
            }"#,
        )
        .unwrap();

        let registry = ComponentRegistry::build(&document).unwrap();

        assert_eq!(registry.detectors().len(), 1);
        let detector = registry.detector("detect_audio_main").unwrap();
        assert_eq!(detector.microphone(), Some("mic_kitchen"));
        assert!(registry.microphone("mic_kitchen").is_some());
    }

    #[test]
    fn build_registers_every_declaration_exactly_once() {
        let document = Document::from_json_str(
            r#"{
              "microphones": [{ "id": "mic_a" }, { "id": "mic_b" }],
              "detectors": [
                { "microphone": "mic_a" },
                { "microphone": "mic_b" },
                { "id": "third", "microphone": "mic_a" }
              ]
            }"#,
        )
        .unwrap();

        let registry = ComponentRegistry::build(&document).unwrap();
        assert_eq!(registry.detectors().len(), 3);
        assert_eq!(
            registry.detector("detect_audio_0").unwrap().microphone(),
            Some("mic_a")
        );
        assert_eq!(
            registry.detector("detect_audio_1").unwrap().microphone(),
            Some("mic_b")
        );
        assert_eq!(registry.detector("third").unwrap().microphone(), Some("mic_a"));
    }

    #[test]
    fn invalid_document_registers_nothing() {
        let document = Document::from_json_str(
            r#"{ "microphones": [], "detectors": [{ "id": "lonely" }] }"#,
        )
        .unwrap();
        assert!(ComponentRegistry::build(&document).is_err());
    }

    #[test]
    fn register_rejects_unbound_detector() {
        let mut registry = ComponentRegistry::default();
        let detector = AudioDetector::new("d", DetectorConfig::default());
        assert!(matches!(
            registry.register(detector).unwrap_err(),
            SonitusError::UnboundMicrophone { .. }
        ));
    }

    #[test]
    fn set_microphone_rebinds() {
        let mut detector = AudioDetector::new("d", DetectorConfig::default());
        assert_eq!(detector.microphone(), None);
        detector.set_microphone("mic_a");
        assert_eq!(detector.microphone(), Some("mic_a"));
        detector.set_microphone("mic_b");
        assert_eq!(detector.microphone(), Some("mic_b"));
    }
}
