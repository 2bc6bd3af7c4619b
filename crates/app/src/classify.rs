//! Inference collaborator boundary.
//!
//! The decision pipeline only ever sees a probability per region; which
//! model produces it is a deployment detail. The TorchScript classifier is
//! gated behind the `with-tch` feature so default builds stay free of the
//! libtorch toolchain; the luminance classifier stands in for it when the
//! pipeline runs without a model attached.

use anyhow::Result;
use control_core::ImageRegion;

/// Turns an image region into a target probability in `[0, 1]`.
pub(crate) trait Classifier: Send {
    fn classify(&self, region: &ImageRegion) -> Result<f32>;
}

/// Model-free stand-in scoring mean luminance through a logistic curve.
///
/// Exists so the full capture → publish → decide path can run end to end on
/// synthetic footage; it is not a detector of anything.
pub(crate) struct LumaClassifier {
    pub(crate) midpoint: f32,
    pub(crate) steepness: f32,
}

impl Default for LumaClassifier {
    fn default() -> Self {
        Self {
            midpoint: 0.5,
            steepness: 10.0,
        }
    }
}

impl Classifier for LumaClassifier {
    fn classify(&self, region: &ImageRegion) -> Result<f32> {
        if region.data.is_empty() {
            anyhow::bail!("empty image region");
        }
        let sum: u64 = region.data.iter().map(|&byte| byte as u64).sum();
        let mean = sum as f32 / region.data.len() as f32 / 255.0;
        let probability = 1.0 / (1.0 + (-(mean - self.midpoint) * self.steepness).exp());
        Ok(probability.clamp(0.0, 1.0))
    }
}

#[cfg(feature = "with-tch")]
pub(crate) use torch::TorchClassifier;

#[cfg(feature = "with-tch")]
mod torch {
    use std::path::Path;

    use anyhow::{Context, Result, bail};
    use control_core::ImageRegion;
    use tch::{CModule, Device, Kind, Tensor};

    use super::Classifier;

    const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
    const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

    /// TorchScript-backed binary classifier.
    pub(crate) struct TorchClassifier {
        module: CModule,
        device: Device,
        input_side: i64,
        target_class: i64,
    }

    impl TorchClassifier {
        /// Load a TorchScript module and run one warmup forward pass.
        pub(crate) fn load(model_path: &Path, use_cpu: bool, target_class: usize) -> Result<Self> {
            let device = if use_cpu {
                Device::Cpu
            } else {
                Device::cuda_if_available()
            };
            let module = CModule::load_on_device(model_path, device)
                .with_context(|| format!("failed to load TorchScript model {model_path:?}"))?;

            let classifier = Self {
                module,
                device,
                input_side: 224,
                target_class: target_class as i64,
            };
            let dummy = Tensor::zeros(
                [1, 3, classifier.input_side, classifier.input_side],
                (Kind::Float, device),
            );
            let warmup = classifier.module.forward_ts(&[dummy])?;
            let classes = warmup.size().get(1).copied().unwrap_or(0);
            if classifier.target_class >= classes {
                bail!(
                    "model outputs {classes} class(es) but target class {} was requested",
                    classifier.target_class
                );
            }
            Ok(classifier)
        }

        fn region_to_tensor(&self, region: &ImageRegion) -> Result<Tensor> {
            let expected = region.width as usize * region.height as usize * 3;
            if region.data.len() != expected {
                bail!(
                    "region buffer holds {} bytes, expected {expected}",
                    region.data.len()
                );
            }
            let tensor = Tensor::from_slice(&region.data)
                .to_device(self.device)
                .to_kind(Kind::Float)
                .view([1, region.height as i64, region.width as i64, 3])
                .permute([0, 3, 1, 2])
                / 255.0;
            let tensor = tensor.upsample_bilinear2d(
                &[self.input_side, self.input_side][..],
                false,
                None::<f64>,
                None::<f64>,
            );
            let mean = Tensor::from_slice(&IMAGENET_MEAN)
                .to_device(self.device)
                .view([1, 3, 1, 1]);
            let std = Tensor::from_slice(&IMAGENET_STD)
                .to_device(self.device)
                .view([1, 3, 1, 1]);
            Ok((tensor - mean) / std)
        }
    }

    impl Classifier for TorchClassifier {
        fn classify(&self, region: &ImageRegion) -> Result<f32> {
            let input = self.region_to_tensor(region)?;
            let output = self
                .module
                .forward_ts(&[input])
                .context("classifier forward pass failed")?;
            let probs = output.softmax(1, Kind::Float);
            let probability = probs.double_value(&[0, self.target_class]) as f32;
            Ok(probability.clamp(0.0, 1.0))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(fill: u8) -> ImageRegion {
        ImageRegion {
            data: vec![fill; 2 * 2 * 3],
            width: 2,
            height: 2,
        }
    }

    #[test]
    fn bright_regions_score_high_and_dark_low() {
        let classifier = LumaClassifier::default();
        let bright = classifier.classify(&region(250)).expect("classify failed");
        let dark = classifier.classify(&region(5)).expect("classify failed");
        assert!(bright > 0.9, "bright region scored {bright}");
        assert!(dark < 0.1, "dark region scored {dark}");
    }

    #[test]
    fn probabilities_stay_in_range() {
        let classifier = LumaClassifier {
            midpoint: 0.0,
            steepness: 1_000.0,
        };
        for fill in [0u8, 127, 255] {
            let p = classifier.classify(&region(fill)).expect("classify failed");
            assert!((0.0..=1.0).contains(&p));
        }
    }

    #[test]
    fn empty_region_is_an_error() {
        let classifier = LumaClassifier::default();
        let empty = ImageRegion {
            data: Vec::new(),
            width: 0,
            height: 0,
        };
        assert!(classifier.classify(&empty).is_err());
    }
}
