//! Two-domain batches
//!
//! `DomainBatch` keeps source and target rows in separate tensors and only
//! concatenates them (source first) when the network needs a single input.

use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::utils::error::{MddError, Result};

/// Which domain a sample was drawn from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Domain {
    Source,
    Target,
}

/// A single sample ready for Burn
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DomainItem {
    /// Flattened features `[channels * height * width]`
    pub features: Vec<f32>,
    /// Class label; for target items this is ground truth kept for evaluation only
    pub label: usize,
    pub domain: Domain,
}

/// Labeled source rows and unlabeled target rows for one training step
#[derive(Clone, Debug)]
pub struct DomainBatch<B: Backend> {
    /// `[num_source, channels, height, width]`
    pub source: Tensor<B, 4>,
    /// `[num_target, channels, height, width]`
    pub target: Tensor<B, 4>,
    /// `[num_source]`
    pub source_labels: Tensor<B, 1, Int>,
}

impl<B: Backend> DomainBatch<B> {
    pub fn new(
        source: Tensor<B, 4>,
        target: Tensor<B, 4>,
        source_labels: Tensor<B, 1, Int>,
    ) -> Result<Self> {
        let [num_source, ..] = source.dims();
        let [num_target, ..] = target.dims();
        let [num_labels] = source_labels.dims();

        if num_source == 0 {
            return Err(MddError::EmptySourceSlice);
        }
        if num_target == 0 {
            return Err(MddError::EmptyTargetSlice {
                labels: num_labels,
                batch: num_source,
            });
        }
        if num_labels != num_source {
            return Err(MddError::ShapeMismatch(format!(
                "{} source labels for {} source rows",
                num_labels, num_source
            )));
        }
        if source.dims()[1..] != target.dims()[1..] {
            return Err(MddError::ShapeMismatch(format!(
                "source rows {:?} and target rows {:?} differ in shape",
                source.dims(),
                target.dims()
            )));
        }

        Ok(Self {
            source,
            target,
            source_labels,
        })
    }

    /// Source rows followed by target rows along axis 0
    pub fn inputs(&self) -> Tensor<B, 4> {
        Tensor::cat(vec![self.source.clone(), self.target.clone()], 0)
    }

    pub fn num_source(&self) -> usize {
        self.source.dims()[0]
    }

    pub fn num_target(&self) -> usize {
        self.target.dims()[0]
    }

    /// `(inputs, source_labels)` in the layout the loss expects
    pub fn into_parts(self) -> (Tensor<B, 4>, Tensor<B, 1, Int>) {
        let inputs = Tensor::cat(vec![self.source, self.target], 0);
        (inputs, self.source_labels)
    }
}

/// Single-domain batch, used for evaluation
#[derive(Clone, Debug)]
pub struct FeatureBatch<B: Backend> {
    /// `[batch_size, channels, height, width]`
    pub inputs: Tensor<B, 4>,
    /// `[batch_size]`
    pub labels: Tensor<B, 1, Int>,
}

/// Turns [`DomainItem`]s into tensors of a fixed per-row shape
#[derive(Clone, Debug)]
pub struct DomainBatcher {
    /// `[channels, height, width]` of one row
    row_shape: [usize; 3],
}

impl DomainBatcher {
    pub fn new(row_shape: [usize; 3]) -> Self {
        Self { row_shape }
    }

    /// Batcher for flat feature vectors fed as `[batch, 1, 1, dim]`
    pub fn for_features(dim: usize) -> Self {
        Self::new([1, 1, dim])
    }

    pub fn row_shape(&self) -> [usize; 3] {
        self.row_shape
    }

    fn row_len(&self) -> usize {
        self.row_shape.iter().product()
    }

    fn inputs<B: Backend>(&self, items: &[DomainItem], device: &B::Device) -> Result<Tensor<B, 4>> {
        let row_len = self.row_len();
        if let Some(bad) = items.iter().find(|item| item.features.len() != row_len) {
            return Err(MddError::ShapeMismatch(format!(
                "item has {} features, expected {}",
                bad.features.len(),
                row_len
            )));
        }

        Ok(self.stack_rows(items, device))
    }

    /// Rows must already have the batcher's length
    fn stack_rows<B: Backend>(&self, items: &[DomainItem], device: &B::Device) -> Tensor<B, 4> {
        let data: Vec<f32> = items.iter().flat_map(|item| item.features.clone()).collect();
        let [channels, height, width] = self.row_shape;

        Tensor::<B, 4>::from_floats(
            TensorData::new(data, [items.len(), channels, height, width]),
            device,
        )
    }

    fn labels<B: Backend>(items: &[DomainItem], device: &B::Device) -> Tensor<B, 1, Int> {
        let labels: Vec<i64> = items.iter().map(|item| item.label as i64).collect();
        Tensor::<B, 1, Int>::from_data(TensorData::new(labels, [items.len()]), device)
    }

    /// Build a training batch; target labels are dropped here
    pub fn pair<B: Backend>(
        &self,
        source: &[DomainItem],
        target: &[DomainItem],
        device: &B::Device,
    ) -> Result<DomainBatch<B>> {
        let misplaced = source.iter().any(|item| item.domain != Domain::Source)
            || target.iter().any(|item| item.domain != Domain::Target);
        if misplaced {
            return Err(MddError::ShapeMismatch(
                "source and target items are mixed up".to_string(),
            ));
        }

        DomainBatch::new(
            self.inputs(source, device)?,
            self.inputs(target, device)?,
            Self::labels(source, device),
        )
    }

    /// Build an evaluation batch, rejecting rows of the wrong length
    pub fn features<B: Backend>(&self, items: &[DomainItem], device: &B::Device) -> Result<FeatureBatch<B>> {
        Ok(FeatureBatch {
            inputs: self.inputs(items, device)?,
            labels: Self::labels(items, device),
        })
    }
}

/// Data-loader entry point; rows of the wrong length are dropped with a warning
impl<B: Backend> Batcher<B, DomainItem, FeatureBatch<B>> for DomainBatcher {
    fn batch(&self, items: Vec<DomainItem>, device: &B::Device) -> FeatureBatch<B> {
        let row_len = self.row_len();
        let total = items.len();
        let kept: Vec<DomainItem> = items
            .into_iter()
            .filter(|item| item.features.len() == row_len)
            .collect();

        if kept.len() != total {
            warn!(
                "Dropped {} of {} items whose feature length is not {}",
                total - kept.len(),
                total,
                row_len
            );
        }

        FeatureBatch {
            inputs: self.stack_rows(&kept, device),
            labels: Self::labels(&kept, device),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    fn item(features: Vec<f32>, label: usize, domain: Domain) -> DomainItem {
        DomainItem {
            features,
            label,
            domain,
        }
    }

    fn to_vec(tensor: Tensor<TestBackend, 4>) -> Vec<f32> {
        tensor.into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn test_inputs_put_source_first() {
        let device = Default::default();
        let batcher = DomainBatcher::for_features(2);

        let source = vec![
            item(vec![1.0, 1.0], 0, Domain::Source),
            item(vec![2.0, 2.0], 1, Domain::Source),
        ];
        let target = vec![item(vec![9.0, 9.0], 1, Domain::Target)];

        let batch = batcher.pair::<TestBackend>(&source, &target, &device).unwrap();
        assert_eq!(batch.num_source(), 2);
        assert_eq!(batch.num_target(), 1);

        let inputs = batch.inputs();
        assert_eq!(inputs.dims(), [3, 1, 1, 2]);
        assert_eq!(to_vec(inputs), vec![1.0, 1.0, 2.0, 2.0, 9.0, 9.0]);

        let (inputs, labels) = batch.into_parts();
        assert_eq!(inputs.dims()[0], 3);
        assert_eq!(labels.into_data().to_vec::<i64>().unwrap(), vec![0, 1]);
    }

    #[test]
    fn test_empty_slices_are_rejected() {
        let device = Default::default();
        let batcher = DomainBatcher::for_features(2);
        let source = vec![item(vec![1.0, 1.0], 0, Domain::Source)];
        let target = vec![item(vec![9.0, 9.0], 1, Domain::Target)];

        assert!(matches!(
            batcher.pair::<TestBackend>(&[], &target, &device),
            Err(MddError::EmptySourceSlice)
        ));
        assert!(matches!(
            batcher.pair::<TestBackend>(&source, &[], &device),
            Err(MddError::EmptyTargetSlice { .. })
        ));
    }

    #[test]
    fn test_label_count_must_match_source_rows() {
        let device = Default::default();
        let source = Tensor::<TestBackend, 4>::zeros([2, 1, 1, 3], &device);
        let target = Tensor::<TestBackend, 4>::zeros([2, 1, 1, 3], &device);
        let labels = Tensor::<TestBackend, 1, Int>::zeros([3], &device);

        assert!(matches!(
            DomainBatch::new(source, target, labels),
            Err(MddError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_domains_must_not_be_swapped() {
        let device = Default::default();
        let batcher = DomainBatcher::for_features(1);
        let source = vec![item(vec![1.0], 0, Domain::Target)];
        let target = vec![item(vec![2.0], 0, Domain::Target)];

        assert!(batcher.pair::<TestBackend>(&source, &target, &device).is_err());
    }

    #[test]
    fn test_wrong_row_length_is_rejected() {
        let device = Default::default();
        let batcher = DomainBatcher::for_features(3);
        let source = vec![item(vec![1.0, 2.0], 0, Domain::Source)];
        let target = vec![item(vec![1.0, 2.0, 3.0], 0, Domain::Target)];

        assert!(matches!(
            batcher.pair::<TestBackend>(&source, &target, &device),
            Err(MddError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_feature_batcher() {
        let device = Default::default();
        let batcher = DomainBatcher::for_features(2);
        let items = vec![
            item(vec![0.5, -0.5], 2, Domain::Target),
            item(vec![1.5, 2.5], 0, Domain::Target),
        ];

        let batch: FeatureBatch<TestBackend> = batcher.batch(items, &device);
        assert_eq!(batch.inputs.dims(), [2, 1, 1, 2]);
        assert_eq!(batch.labels.into_data().to_vec::<i64>().unwrap(), vec![2, 0]);
    }

    #[test]
    fn test_features_rejects_wrong_row_length() {
        let device = Default::default();
        let batcher = DomainBatcher::for_features(2);
        let items = vec![
            item(vec![1.0, 2.0, 3.0, 4.0], 0, Domain::Target),
            item(vec![5.0], 1, Domain::Target),
        ];

        assert!(matches!(
            batcher.features::<TestBackend>(&items, &device),
            Err(MddError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_feature_batcher_drops_malformed_rows() {
        let device = Default::default();
        let batcher = DomainBatcher::for_features(2);
        let items = vec![
            item(vec![1.0, 2.0, 3.0, 4.0], 0, Domain::Target),
            item(vec![5.0], 1, Domain::Target),
            item(vec![6.0, 7.0], 2, Domain::Target),
        ];

        let batch: FeatureBatch<TestBackend> = batcher.batch(items, &device);
        assert_eq!(batch.inputs.dims(), [1, 1, 1, 2]);
        assert_eq!(to_vec(batch.inputs), vec![6.0, 7.0]);
        assert_eq!(batch.labels.into_data().to_vec::<i64>().unwrap(), vec![2]);
    }
}
