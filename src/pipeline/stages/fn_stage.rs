use crate::error::StagelineResult;
use crate::pipeline::{Stage, StageDescriptor, StageOutput};
use crate::state::StateView;
use async_trait::async_trait;

/// Stage whose body is a synchronous closure
///
/// # Example
/// ```
/// use serde_json::json;
/// use stageline::pipeline::stages::FnStage;
/// use stageline::pipeline::{StageDescriptor, StageOutput};
///
/// let stage = FnStage::new(
///     StageDescriptor::new("count", "item_count").requires(["items"]),
///     |state| Ok(StageOutput::new(json!(state.get_list("items")?.len()))),
/// );
/// ```
pub struct FnStage<F> {
    descriptor: StageDescriptor,
    func: F,
}

impl<F> FnStage<F>
where
    F: Fn(&StateView) -> StagelineResult<StageOutput> + Send + Sync,
{
    pub fn new(descriptor: StageDescriptor, func: F) -> Self {
        Self { descriptor, func }
    }
}

#[async_trait]
impl<F> Stage for FnStage<F>
where
    F: Fn(&StateView) -> StagelineResult<StageOutput> + Send + Sync,
{
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    async fn run(&self, state: &StateView) -> StagelineResult<StageOutput> {
        (self.func)(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StagelineError;
    use crate::state::StateStore;
    use serde_json::json;

    #[tokio::test]
    async fn test_fn_stage_reads_state() {
        let store = StateStore::with_inputs([("n", json!(20))]).unwrap();
        let stage = FnStage::new(StageDescriptor::new("double", "doubled"), |state| {
            Ok(StageOutput::new(json!(state.get_number("n")? * 2.0)))
        });

        let output = stage.run(&store.view()).await.unwrap();
        assert_eq!(output.value, json!(40.0));
        assert_eq!(stage.name(), "double");
    }

    #[tokio::test]
    async fn test_fn_stage_propagates_error() {
        let stage = FnStage::new(StageDescriptor::new("read", "out"), |state| {
            state.get("absent").map(StageOutput::new)
        });

        let err = stage.run(&StateStore::new().view()).await.unwrap_err();
        assert!(matches!(err, StagelineError::KeyNotFound(key) if key == "absent"));
    }
}
