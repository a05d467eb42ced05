//! MDD loss assembly
//!
//! For a batch whose first `ns` rows are labeled source rows:
//!
//! ```text
//! classifier = CE(outputs[..ns], labels)
//! pseudo     = argmax(outputs, 1)
//! adv_src    = CE(outputs_adv[..ns], pseudo[..ns])
//! adv_tgt    = NLL(log(max(1 - softmax(outputs_adv[ns..]), floor)), pseudo[ns..])
//! transfer   = src_weight * adv_src + adv_tgt
//! total      = classifier + transfer
//! ```

use burn::{
    nn::loss::CrossEntropyLossConfig,
    tensor::{
        activation::softmax,
        backend::{AutodiffBackend, Backend},
        ElementConversion, Int, Tensor,
    },
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::config::MddConfig;
use crate::utils::error::{MddError, Result};

/// Lower bound on `1 - p` before the logarithm in the target term
pub const LOG_FLOOR: f64 = 1e-15;

/// Default weight of the source adversarial term
pub const DEFAULT_SRC_WEIGHT: f64 = 3.0;

/// Loss component tensors from one assembly
#[derive(Debug, Clone)]
pub struct MddLossOutput<B: Backend> {
    pub total: Tensor<B, 1>,
    pub classifier: Tensor<B, 1>,
    pub transfer: Tensor<B, 1>,
    pub adv_src: Tensor<B, 1>,
    pub adv_tgt: Tensor<B, 1>,
    /// False once the loss was computed off the autodiff graph
    tracked: bool,
}

impl<B: Backend> MddLossOutput<B> {
    /// Whether `total` can be backpropagated to the network parameters
    pub fn is_tracked(&self) -> bool {
        self.tracked
    }

    /// Read every component back as a host scalar
    pub fn values(&self) -> LossValues {
        let scalar = |t: &Tensor<B, 1>| -> f64 { t.clone().into_scalar().elem() };

        LossValues {
            total: scalar(&self.total),
            classifier: scalar(&self.classifier),
            transfer: scalar(&self.transfer),
            adv_src: scalar(&self.adv_src),
            adv_tgt: scalar(&self.adv_tgt),
        }
    }
}

impl<B: AutodiffBackend> MddLossOutput<B> {
    /// Lift a loss computed without a graph onto the autodiff backend
    pub fn from_inner(inner: MddLossOutput<B::InnerBackend>) -> Self {
        Self {
            total: Tensor::from_inner(inner.total),
            classifier: Tensor::from_inner(inner.classifier),
            transfer: Tensor::from_inner(inner.transfer),
            adv_src: Tensor::from_inner(inner.adv_src),
            adv_tgt: Tensor::from_inner(inner.adv_tgt),
            tracked: false,
        }
    }
}

/// Host-side copy of the loss components, for logging and metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LossValues {
    pub total: f64,
    pub classifier: f64,
    pub transfer: f64,
    pub adv_src: f64,
    pub adv_tgt: f64,
}

/// Arg-max class per row, `[batch, classes]` -> `[batch]`
pub fn pseudo_labels<B: Backend>(outputs: Tensor<B, 2>) -> Tensor<B, 1, Int> {
    let [batch, _] = outputs.dims();
    outputs.argmax(1).reshape([batch])
}

/// Mean of `-log(max(1 - softmax(logits)[i, pseudo[i]], floor))`
pub fn target_disparity_loss<B: Backend>(
    logits_adv: Tensor<B, 2>,
    pseudo: Tensor<B, 1, Int>,
    floor: f64,
) -> Tensor<B, 1> {
    let complement = softmax(logits_adv, 1).neg().add_scalar(1.0);
    let log_complement = complement.clamp_min(floor).log();

    log_complement
        .gather(1, pseudo.unsqueeze_dim::<2>(1))
        .mean()
        .neg()
}

/// Assembles the MDD objective from the network outputs
#[derive(Debug, Clone)]
pub struct MddLoss {
    class_num: usize,
    src_weight: f64,
    log_floor: f64,
}

impl MddLoss {
    pub fn new(class_num: usize, src_weight: f64) -> Self {
        Self {
            class_num,
            src_weight,
            log_floor: LOG_FLOOR,
        }
    }

    pub fn from_config(config: &MddConfig) -> Self {
        Self::new(config.class_num, config.src_weight)
    }

    pub fn class_num(&self) -> usize {
        self.class_num
    }

    pub fn src_weight(&self) -> f64 {
        self.src_weight
    }

    /// Both slices of the batch must be non-empty
    pub fn check_split(&self, batch: usize, num_source: usize) -> Result<()> {
        if num_source == 0 {
            return Err(MddError::EmptySourceSlice);
        }
        if num_source >= batch {
            return Err(MddError::EmptyTargetSlice {
                labels: num_source,
                batch,
            });
        }
        Ok(())
    }

    fn check_inputs<B: Backend>(
        &self,
        outputs: &Tensor<B, 2>,
        outputs_adv: &Tensor<B, 2>,
        labels: &Tensor<B, 1, Int>,
    ) -> Result<()> {
        let [batch, classes] = outputs.dims();
        let [num_source] = labels.dims();

        self.check_split(batch, num_source)?;

        if classes != self.class_num {
            return Err(MddError::ClassDimensionMismatch {
                expected: self.class_num,
                actual: classes,
            });
        }

        if outputs_adv.dims() != outputs.dims() {
            return Err(MddError::ShapeMismatch(format!(
                "adversarial logits {:?} do not match primary logits {:?}",
                outputs_adv.dims(),
                outputs.dims()
            )));
        }

        let min: i64 = labels.clone().min().into_scalar().elem();
        let max: i64 = labels.clone().max().into_scalar().elem();
        for label in [min, max] {
            if label < 0 || label as usize >= self.class_num {
                return Err(MddError::LabelOutOfRange {
                    label,
                    class_num: self.class_num,
                });
            }
        }

        Ok(())
    }

    /// Assemble the loss
    ///
    /// # Arguments
    /// * `outputs` - primary logits, `[batch, class_num]`
    /// * `outputs_adv` - adversarial logits, `[batch, class_num]`
    /// * `labels` - one label per source row; source rows come first
    pub fn forward<B: Backend>(
        &self,
        outputs: Tensor<B, 2>,
        outputs_adv: Tensor<B, 2>,
        labels: Tensor<B, 1, Int>,
    ) -> Result<MddLossOutput<B>> {
        self.check_inputs(&outputs, &outputs_adv, &labels)?;

        let [batch, _] = outputs.dims();
        let [num_source] = labels.dims();
        let num_target = batch - num_source;
        let device = outputs.device();
        let cross_entropy = CrossEntropyLossConfig::new().init(&device);

        let classifier =
            cross_entropy.forward(outputs.clone().narrow(0, 0, num_source), labels);

        let pseudo = pseudo_labels(outputs);
        let pseudo_src = pseudo.clone().narrow(0, 0, num_source);
        let pseudo_tgt = pseudo.narrow(0, num_source, num_target);

        let adv_src = cross_entropy.forward(outputs_adv.clone().narrow(0, 0, num_source), pseudo_src);
        let adv_tgt = target_disparity_loss(
            outputs_adv.narrow(0, num_source, num_target),
            pseudo_tgt,
            self.log_floor,
        );

        let transfer = adv_src.clone().mul_scalar(self.src_weight) + adv_tgt.clone();
        let total = classifier.clone() + transfer.clone();

        debug!(
            "MDD loss assembled: {} source rows, {} target rows",
            num_source, num_target
        );

        Ok(MddLossOutput {
            total,
            classifier,
            transfer,
            adv_src,
            adv_tgt,
            tracked: true,
        })
    }
}

impl Default for MddLoss {
    fn default() -> Self {
        Self::new(MddConfig::default().class_num, DEFAULT_SRC_WEIGHT)
    }
}
