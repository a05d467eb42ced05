//! MDD training facade
//!
//! Owns the network, the reversal schedule and the loss assembler, and is the
//! only place the schedule advances:
//!
//! - training-mode [`Mdd::compute_loss`] advances it once, right before the
//!   forward pass whose reversal it parameterizes
//! - evaluation-mode losses and [`Mdd::predict`] only read it
//!
//! Every state-changing method takes `&mut self`, so calls are serialized by
//! the borrow checker.

use burn::{
    module::{list_param_ids, AutodiffModule, ParamId},
    optim::{GradientsParams, Optimizer},
    tensor::{backend::AutodiffBackend, Int, Tensor},
};
use tracing::{debug, info};

use crate::dataset::batch::DomainBatch;
use crate::model::config::{LrMultipliers, MddConfig};
use crate::model::grl::GradientReversal;
use crate::model::network::{MddNet, SubNetwork};
use crate::training::loss::{MddLoss, MddLossOutput};
use crate::training::schedule::{GrlScheduler, ScheduleState};
use crate::utils::error::{MddError, Result};

/// Parameters of one sub-network with the learning-rate multiplier to apply
#[derive(Debug, Clone)]
pub struct ParamGroup {
    pub sub_network: SubNetwork,
    pub lr_multiplier: f64,
    pub param_ids: Vec<ParamId>,
}

/// Margin Disparity Discrepancy model
pub struct Mdd<B: AutodiffBackend> {
    c_net: MddNet<B>,
    scheduler: GrlScheduler,
    loss: MddLoss,
    lr_multipliers: LrMultipliers,
    device: B::Device,
    is_train: bool,
    iter_num: u64,
}

impl<B: AutodiffBackend> Mdd<B> {
    /// Build the model on `device`
    ///
    /// Starts in evaluation mode; call [`Mdd::set_train`] before training.
    pub fn new(config: &MddConfig, device: &B::Device) -> Result<Self> {
        let c_net = MddNet::new(config, device)?;

        info!(
            "MDD model ready: backbone {}, {} classes, src_weight {}, schedule {:?}",
            config.base_net, config.class_num, config.src_weight, config.schedule
        );

        Ok(Self {
            c_net,
            scheduler: GrlScheduler::new(config.schedule),
            loss: MddLoss::from_config(config),
            lr_multipliers: config.lr_multipliers,
            device: device.clone(),
            is_train: false,
            iter_num: 0,
        })
    }

    /// MDD loss for a batch whose first `labels_source.len()` rows are source rows
    pub fn compute_loss(
        &mut self,
        inputs: Tensor<B, 4>,
        labels_source: Tensor<B, 1, Int>,
    ) -> Result<MddLossOutput<B>> {
        // Reject bad calls before the schedule moves
        let dims = inputs.dims();
        self.c_net.backbone.check_input(dims)?;
        self.loss.check_split(dims[0], labels_source.dims()[0])?;

        let loss = if self.is_train {
            let state = self.scheduler.advance();
            let grl = GradientReversal::from(&state);
            debug!(
                "Training forward: iter {}, grl coeff {:.6}",
                state.iter_num,
                grl.coeff()
            );

            let output = self.c_net.forward(inputs, &grl);
            self.loss
                .forward(output.outputs, output.outputs_adv, labels_source)?
        } else {
            let grl = GradientReversal::from(&self.scheduler.state());
            let output = self.c_net.valid().forward(inputs.inner(), &grl);
            let loss = self
                .loss
                .forward(output.outputs, output.outputs_adv, labels_source.inner())?;
            MddLossOutput::from_inner(loss)
        };

        self.iter_num += 1;
        Ok(loss)
    }

    /// [`Mdd::compute_loss`] on an explicit source/target batch
    pub fn compute_domain_loss(&mut self, batch: &DomainBatch<B>) -> Result<MddLossOutput<B>> {
        self.compute_loss(batch.inputs(), batch.source_labels.clone())
    }

    /// Class probabilities, `[batch, class_num]`
    ///
    /// Runs without dropout, on running BatchNorm statistics and without an
    /// autodiff graph. Never advances the schedule.
    pub fn predict(&self, inputs: Tensor<B, 4>) -> Result<Tensor<B::InnerBackend, 2>> {
        self.c_net.backbone.check_input(inputs.dims())?;

        let grl = GradientReversal::from(&self.scheduler.state());
        let output = self.c_net.valid().forward(inputs.inner(), &grl);
        Ok(output.softmax_outputs)
    }

    /// Arg-max class per row
    pub fn predict_labels(&self, inputs: Tensor<B, 4>) -> Result<Tensor<B::InnerBackend, 1, Int>> {
        let probabilities = self.predict(inputs)?;
        let [batch, _] = probabilities.dims();
        Ok(probabilities.argmax(1).reshape([batch]))
    }

    /// Four parameter groups: backbone, bottleneck, classifier, classifier_adv
    pub fn get_parameter_list(&self) -> Vec<ParamGroup> {
        SubNetwork::ALL
            .into_iter()
            .map(|sub_network| ParamGroup {
                sub_network,
                lr_multiplier: self.lr_multipliers.get(sub_network),
                param_ids: self.c_net.param_ids(sub_network),
            })
            .collect()
    }

    /// Switch between training and evaluation behavior
    pub fn set_train(&mut self, mode: bool) {
        self.is_train = mode;
    }

    /// Backpropagate `loss` and update each sub-network at
    /// `base_lr * lr_multiplier`
    ///
    /// Losses computed in evaluation mode carry no graph and are rejected
    /// without touching the parameters.
    pub fn step<O>(&mut self, optimizer: &mut O, base_lr: f64, loss: &MddLossOutput<B>) -> Result<()>
    where
        O: Optimizer<MddNet<B>, B>,
    {
        if !loss.is_tracked() {
            return Err(MddError::DetachedLoss(
                "loss was computed in evaluation mode; call set_train(true) first".to_string(),
            ));
        }

        let mut grads = loss.total.backward();

        let groups = [
            (
                SubNetwork::Backbone,
                GradientsParams::from_module(&mut grads, &self.c_net.backbone),
            ),
            (
                SubNetwork::Bottleneck,
                GradientsParams::from_module(&mut grads, &self.c_net.bottleneck),
            ),
            (
                SubNetwork::Classifier,
                GradientsParams::from_module(&mut grads, &self.c_net.classifier),
            ),
            (
                SubNetwork::ClassifierAdv,
                GradientsParams::from_module(&mut grads, &self.c_net.classifier_adv),
            ),
        ];

        for (sub_network, group_grads) in groups {
            let multiplier = self.lr_multipliers.get(sub_network);
            if multiplier == 0.0 {
                continue;
            }
            self.c_net = optimizer.step(base_lr * multiplier, self.c_net.clone(), group_grads);
        }

        Ok(())
    }

    pub fn iter_num(&self) -> u64 {
        self.iter_num
    }

    pub fn schedule(&self) -> ScheduleState {
        self.scheduler.state()
    }

    pub fn is_train(&self) -> bool {
        self.is_train
    }

    pub fn class_num(&self) -> usize {
        self.loss.class_num()
    }

    pub fn src_weight(&self) -> f64 {
        self.loss.src_weight()
    }

    pub fn network(&self) -> &MddNet<B> {
        &self.c_net
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    /// Total number of parameter tensors in the network
    pub fn num_param_tensors(&self) -> usize {
        list_param_ids(&self.c_net).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use burn::backend::Autodiff;
    use burn::module::Module;
    use burn::optim::SgdConfig;
    use burn::tensor::{Distribution, TensorData};
    use burn_ndarray::NdArray;

    use crate::dataset::{DomainBatcher, ShiftedBlobs, ShiftedBlobsConfig};
    use crate::model::backbone::{Backbone, BackboneKind};

    type TestBackend = Autodiff<NdArray>;

    const DIM: usize = 6;

    fn model() -> Mdd<TestBackend> {
        Mdd::new(&MddConfig::features(DIM, 3), &Default::default()).unwrap()
    }

    fn inputs(rows: usize) -> Tensor<TestBackend, 4> {
        Tensor::random([rows, 1, 1, DIM], Distribution::Normal(0.0, 1.0), &Default::default())
    }

    fn labels(values: Vec<i64>) -> Tensor<TestBackend, 1, Int> {
        let len = values.len();
        Tensor::from_data(TensorData::new(values, [len]), &Default::default())
    }

    fn backbone_weights(mdd: &Mdd<TestBackend>) -> Vec<f32> {
        match &mdd.network().backbone {
            Backbone::Mlp(mlp) => mlp.input.weight.val().into_data().to_vec::<f32>().unwrap(),
            other => panic!("unexpected backbone {:?}", other),
        }
    }

    fn head_weights(mdd: &Mdd<TestBackend>) -> Vec<f32> {
        let weight = mdd.network().classifier.fc2.weight.val();
        weight.into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn test_end_to_end_loss_and_predict() {
        let mut mdd = model();
        mdd.set_train(true);

        let loss = mdd
            .compute_loss(inputs(10), labels(vec![0, 1, 2, 0, 1, 2]))
            .unwrap();
        let values = loss.values();
        assert!(values.total.is_finite());
        assert!(values.total >= 0.0);
        assert!(values.adv_src >= 0.0);
        assert!(values.adv_tgt >= 0.0);
        assert_eq!(mdd.iter_num(), 1);

        let probabilities = mdd.predict(inputs(10)).unwrap();
        assert_eq!(probabilities.dims(), [10, 3]);
        let rows = probabilities.into_data().to_vec::<f32>().unwrap();
        for row in rows.chunks(3) {
            let sum: f32 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_all_source_batch_is_rejected() {
        let mut mdd = model();
        mdd.set_train(true);

        let result = mdd.compute_loss(inputs(4), labels(vec![0, 1, 2, 0]));
        assert!(matches!(result, Err(MddError::EmptyTargetSlice { .. })));
        assert_eq!(mdd.schedule().iter_num, 0);
        assert_eq!(mdd.iter_num(), 0);
    }

    #[test]
    fn test_wrong_input_width_is_rejected() {
        let mut mdd = model();
        let bad = Tensor::<TestBackend, 4>::zeros([4, 1, 1, DIM + 1], &Default::default());

        assert!(matches!(
            mdd.compute_loss(bad.clone(), labels(vec![0])),
            Err(MddError::ShapeMismatch(_))
        ));
        assert!(mdd.predict(bad).is_err());
    }

    #[test]
    fn test_schedule_advances_only_in_training_mode() {
        let mut mdd = model();
        assert!(!mdd.is_train());

        mdd.compute_loss(inputs(4), labels(vec![0, 1])).unwrap();
        assert_eq!(mdd.schedule().iter_num, 0);
        assert_eq!(mdd.iter_num(), 1);

        mdd.set_train(true);
        mdd.compute_loss(inputs(4), labels(vec![0, 1])).unwrap();
        mdd.compute_loss(inputs(4), labels(vec![2, 1])).unwrap();
        assert_eq!(mdd.schedule().iter_num, 2);
        assert_eq!(mdd.iter_num(), 3);
    }

    #[test]
    fn test_predict_does_not_advance_schedule() {
        let mut mdd = model();
        mdd.set_train(true);

        for _ in 0..5 {
            mdd.predict(inputs(3)).unwrap();
        }
        assert_eq!(mdd.schedule().iter_num, 0);
        assert_eq!(mdd.schedule().coefficient(), 0.0);
    }

    #[test]
    fn test_parameter_groups_partition_the_network() {
        let mdd = model();
        let groups = mdd.get_parameter_list();

        let kinds: Vec<SubNetwork> = groups.iter().map(|g| g.sub_network).collect();
        assert_eq!(kinds, SubNetwork::ALL.to_vec());

        let multipliers: Vec<f64> = groups.iter().map(|g| g.lr_multiplier).collect();
        assert_eq!(multipliers, vec![0.1, 1.0, 1.0, 1.0]);

        let mut seen = HashSet::new();
        let mut total = 0;
        for group in &groups {
            assert!(!group.param_ids.is_empty(), "{} has no parameters", group.sub_network);
            for id in &group.param_ids {
                assert!(seen.insert(*id), "parameter shared between groups");
            }
            total += group.param_ids.len();
        }
        assert_eq!(total, mdd.num_param_tensors());
    }

    #[test]
    fn test_zero_backbone_multiplier_freezes_backbone() {
        let mut config = MddConfig::features(DIM, 3);
        config.lr_multipliers.backbone = 0.0;
        let mut mdd = Mdd::<TestBackend>::new(&config, &Default::default()).unwrap();
        mdd.set_train(true);

        let mut optimizer = SgdConfig::new().init::<TestBackend, MddNet<TestBackend>>();
        let backbone_before = backbone_weights(&mdd);
        let head_before = head_weights(&mdd);

        let loss = mdd
            .compute_loss(inputs(8), labels(vec![0, 1, 2, 0]))
            .unwrap();
        mdd.step(&mut optimizer, 0.1, &loss).unwrap();

        assert_eq!(backbone_weights(&mdd), backbone_before);
        assert_ne!(head_weights(&mdd), head_before);
    }

    #[test]
    fn test_training_on_shifted_blobs_stays_finite() {
        let blobs = ShiftedBlobsConfig {
            num_classes: 3,
            input_dim: DIM,
            samples_per_class: 8,
            ..Default::default()
        };
        let (source, target) = ShiftedBlobs::pair(&blobs).unwrap();
        let batcher = DomainBatcher::for_features(DIM);
        let device = Default::default();

        let mut mdd = model();
        mdd.set_train(true);
        let mut optimizer = SgdConfig::new().init::<TestBackend, MddNet<TestBackend>>();

        for step in 0..5 {
            let batch = batcher
                .pair::<TestBackend>(&source.window(step * 6, 6), &target.window(step * 6, 6), &device)
                .unwrap();
            let loss = mdd.compute_domain_loss(&batch).unwrap();
            assert!(loss.values().total.is_finite());
            mdd.step(&mut optimizer, 0.01, &loss).unwrap();
        }

        assert_eq!(mdd.schedule().iter_num, 5);

        let eval = batcher
            .pair::<TestBackend>(&source.window(0, 4), &target.window(0, 4), &device)
            .unwrap();
        let probabilities = mdd.predict(eval.inputs()).unwrap();
        let labels = mdd.predict_labels(eval.inputs()).unwrap();
        assert_eq!(labels.dims(), [8]);

        let values = probabilities.into_data().to_vec::<f32>().unwrap();
        assert!(values.iter().all(|p| p.is_finite()));
        assert!(mdd.network().num_params() > 0);
    }

    #[test]
    fn test_step_rejects_evaluation_mode_loss() {
        let mut mdd = model();
        assert!(!mdd.is_train());

        let mut optimizer = SgdConfig::new().init::<TestBackend, MddNet<TestBackend>>();
        let backbone_before = backbone_weights(&mdd);
        let head_before = head_weights(&mdd);

        let loss = mdd
            .compute_loss(inputs(8), labels(vec![0, 1, 2, 0]))
            .unwrap();
        assert!(!loss.is_tracked());
        assert!(loss.values().total.is_finite());

        let result = mdd.step(&mut optimizer, 0.5, &loss);
        assert!(matches!(result, Err(MddError::DetachedLoss(_))));
        assert_eq!(backbone_weights(&mdd), backbone_before);
        assert_eq!(head_weights(&mdd), head_before);
        assert_eq!(mdd.schedule().iter_num, 0);

        // The same model trains once switched over
        mdd.set_train(true);
        let loss = mdd
            .compute_loss(inputs(8), labels(vec![0, 1, 2, 0]))
            .unwrap();
        assert!(loss.is_tracked());
        mdd.step(&mut optimizer, 0.5, &loss).unwrap();
        assert_ne!(head_weights(&mdd), head_before);
    }

    #[test]
    fn test_small_convnet_input_is_rejected_before_the_schedule_moves() {
        let mut config = MddConfig::new(BackboneKind::ConvNet, 3);
        config.bottleneck_width = 16;
        config.width = 16;
        let mut mdd = Mdd::<TestBackend>::new(&config, &Default::default()).unwrap();
        mdd.set_train(true);

        let small = Tensor::<TestBackend, 4>::zeros([4, 3, 8, 8], &Default::default());
        let result = mdd.compute_loss(small.clone(), labels(vec![0, 1]));
        assert!(matches!(result, Err(MddError::ShapeMismatch(_))));
        assert!(mdd.predict(small).is_err());
        assert_eq!(mdd.schedule().iter_num, 0);
        assert_eq!(mdd.iter_num(), 0);
    }
}
