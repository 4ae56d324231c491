pub mod layers;
pub mod resnet;
pub mod mobilenet;
pub mod classifier;
pub mod preprocess;
pub mod inference;
pub mod perturbation;

#[cfg(test)]
pub(crate) mod test_support;

pub use classifier::{Architecture, Classify, ImageClassifier};
pub use preprocess::{Normalization, INPUT_SIZE, load_base_tensor, reconstruct_adversarial};
pub use inference::ClassifierProfile;
pub use perturbation::{Perturbation, PerturbationOptimizer, PerturbationOutcome, StepReport};
