//! Responsive variant cascade.
//!
//! A variant set is four artifacts of one source, labelled `4x` down to
//! `1x`. Quality and resize percentage both start high and drop by a fixed
//! step per iteration, never below 10:
//!
//! | Iteration | Label | Quality (90/15) | Resize (100/20) |
//! |---|---|---|---|
//! | 0 | `4x` | 90 | 100% |
//! | 1 | `3x` | 75 | 80% |
//! | 2 | `2x` | 60 | 60% |
//! | 3 | `1x` | 45 | 40% |
//!
//! Each variant goes through the same single-artifact path as the primary
//! image. A variant that cannot be made smaller than its source points at
//! the source itself; one that fails outright is omitted from the list.

use crate::config::VariantsConfig;
use crate::imaging::cascade_value;
use crate::process::{NodeError, Produced};
use crate::types::{ResolvedImage, TargetFormat, TransformRequest, VariantLabel};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::{debug, warn};

/// Anything that can turn a request into an artifact.
pub trait ArtifactProducer {
    fn produce(
        &self,
        image: &ResolvedImage,
        explicit: Option<(u32, u32)>,
        request: &TransformRequest,
    ) -> Result<Produced, NodeError>;
}

/// One entry of a candidate list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub label: VariantLabel,
    pub url: String,
    pub width: u32,
    /// Points at the unmodified source.
    pub original: bool,
}

#[derive(Debug)]
pub struct VariantFailure {
    pub label: VariantLabel,
    pub error: NodeError,
}

/// Outcome of one cascade, largest variant first.
#[derive(Debug, Default)]
pub struct VariantSet {
    pub candidates: Vec<Candidate>,
    pub failures: Vec<VariantFailure>,
}

impl VariantSet {
    /// `"url Ww, url Ww, …"`, or `None` when nothing survived.
    pub fn srcset(&self) -> Option<String> {
        if self.candidates.is_empty() {
            return None;
        }
        let entries: Vec<String> = self
            .candidates
            .iter()
            .map(|c| format!("{} {}w", c.url, c.width))
            .collect();
        Some(entries.join(", "))
    }

    pub fn get(&self, label: VariantLabel) -> Option<&Candidate> {
        self.candidates.iter().find(|c| c.label == label)
    }
}

/// The four requests of a cascade, `4x` first.
pub fn variant_requests(config: &VariantsConfig, format: TargetFormat) -> Vec<TransformRequest> {
    (0..VariantLabel::COUNT)
        .filter_map(|i| {
            let label = VariantLabel::for_iteration(i)?;
            Some(TransformRequest {
                quality: cascade_value(config.start_quality, config.quality_step, i),
                resize: cascade_value(config.start_resize, config.resize_step, i),
                format,
                variant: Some(label),
                pre_variant: false,
            })
        })
        .collect()
}

/// Run every request through `producer`, in order.
pub fn generate_variants(
    producer: &impl ArtifactProducer,
    image: &ResolvedImage,
    explicit: Option<(u32, u32)>,
    requests: &[TransformRequest],
) -> VariantSet {
    let mut set = VariantSet::default();

    for request in requests {
        let Some(label) = request.variant else {
            continue;
        };
        match producer.produce(image, explicit, request) {
            Ok(Produced::Artifact { url, width, .. }) => set.candidates.push(Candidate {
                label,
                url,
                width: width.unwrap_or_default(),
                original: false,
            }),
            Ok(Produced::Original { width }) => {
                debug!(src = %image.public_src, %label, "variant falls back to source");
                set.candidates.push(Candidate {
                    label,
                    url: image.public_src.clone(),
                    width,
                    original: true,
                });
            }
            Ok(Produced::Negative) => {
                debug!(src = %image.public_src, %label, "variant has a negative marker");
            }
            Err(error) => {
                warn!(src = %image.public_src, %label, "variant failed: {error}");
                set.failures.push(VariantFailure { label, error });
            }
        }
    }

    set
}

/// Transparent SVG of the given size, as a base64 data URI.
pub fn svg_placeholder(width: u32, height: u32) -> String {
    let svg = format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{width}" height="{height}"></svg>"#
    );
    format!("data:image/svg+xml;base64,{}", STANDARD.encode(svg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::TranscodeError;
    use std::cell::RefCell;
    use std::path::PathBuf;

    /// Replays one canned result per call.
    struct Scripted {
        results: RefCell<Vec<Result<Produced, NodeError>>>,
        seen: RefCell<Vec<TransformRequest>>,
    }

    impl Scripted {
        fn new(mut results: Vec<Result<Produced, NodeError>>) -> Self {
            results.reverse();
            Self {
                results: RefCell::new(results),
                seen: RefCell::new(Vec::new()),
            }
        }
    }

    impl ArtifactProducer for Scripted {
        fn produce(
            &self,
            _image: &ResolvedImage,
            _explicit: Option<(u32, u32)>,
            request: &TransformRequest,
        ) -> Result<Produced, NodeError> {
            self.seen.borrow_mut().push(*request);
            self.results
                .borrow_mut()
                .pop()
                .unwrap_or(Ok(Produced::Negative))
        }
    }

    fn image() -> ResolvedImage {
        ResolvedImage {
            path: PathBuf::from("/site/img/photo.jpg"),
            reference: "/img/photo.jpg".into(),
            public_src: "/img/photo.jpg".into(),
            extension: "jpg".into(),
            already_lazy: false,
        }
    }

    fn artifact(url: &str, width: u32) -> Result<Produced, NodeError> {
        Ok(Produced::Artifact {
            url: url.into(),
            width: Some(width),
            cached: false,
        })
    }

    #[test]
    fn default_cascade() {
        let requests = variant_requests(&VariantsConfig::default(), TargetFormat::Webp);
        let steps: Vec<(String, u32, u32)> = requests
            .iter()
            .map(|r| (r.variant.unwrap().to_string(), r.quality, r.resize))
            .collect();
        assert_eq!(
            steps,
            [
                ("4x".to_string(), 90, 100),
                ("3x".to_string(), 75, 80),
                ("2x".to_string(), 60, 60),
                ("1x".to_string(), 45, 40),
            ]
        );
        assert!(requests.iter().all(|r| r.format == TargetFormat::Webp && !r.pre_variant));
    }

    #[test]
    fn cascade_never_drops_below_floor() {
        let config = VariantsConfig {
            start_quality: 40,
            quality_step: 20,
            start_resize: 30,
            resize_step: 15,
            ..VariantsConfig::default()
        };
        let requests = variant_requests(&config, TargetFormat::Jpg);
        let qualities: Vec<u32> = requests.iter().map(|r| r.quality).collect();
        let resizes: Vec<u32> = requests.iter().map(|r| r.resize).collect();
        assert_eq!(qualities, [40, 20, 10, 10]);
        assert_eq!(resizes, [30, 15, 10, 10]);
    }

    #[test]
    fn candidates_in_cascade_order() {
        let producer = Scripted::new(vec![
            artifact("/c/p_4x.jpg", 1000),
            artifact("/c/p_3x.jpg", 800),
            artifact("/c/p_2x.jpg", 600),
            artifact("/c/p_1x.jpg", 400),
        ]);
        let requests = variant_requests(&VariantsConfig::default(), TargetFormat::Jpg);
        let set = generate_variants(&producer, &image(), None, &requests);

        assert_eq!(
            set.srcset().unwrap(),
            "/c/p_4x.jpg 1000w, /c/p_3x.jpg 800w, /c/p_2x.jpg 600w, /c/p_1x.jpg 400w"
        );
        assert_eq!(producer.seen.borrow().len(), 4);
    }

    #[test]
    fn fallback_and_failure() {
        let producer = Scripted::new(vec![
            Ok(Produced::Original { width: 1200 }),
            Err(NodeError::Transcode(TranscodeError::Encode("boom".into()))),
            artifact("/c/p_2x.jpg", 600),
            Ok(Produced::Negative),
        ]);
        let requests = variant_requests(&VariantsConfig::default(), TargetFormat::Jpg);
        let set = generate_variants(&producer, &image(), None, &requests);

        assert_eq!(set.srcset().unwrap(), "/img/photo.jpg 1200w, /c/p_2x.jpg 600w");
        assert!(set.candidates[0].original);
        assert_eq!(set.failures.len(), 1);
        assert_eq!(set.failures[0].label.to_string(), "3x");
        assert_eq!(
            set.get(VariantLabel::parse("2x").unwrap()).map(|c| c.url.as_str()),
            Some("/c/p_2x.jpg")
        );
    }

    #[test]
    fn empty_set_has_no_srcset() {
        assert_eq!(VariantSet::default().srcset(), None);
    }

    #[test]
    fn placeholder_encodes_dimensions() {
        let uri = svg_placeholder(800, 600);
        let payload = uri.strip_prefix("data:image/svg+xml;base64,").unwrap();
        let svg = String::from_utf8(STANDARD.decode(payload).unwrap()).unwrap();
        assert_eq!(
            svg,
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="800" height="600"></svg>"#
        );
    }
}
