use async_trait::async_trait;
use serde_json::json;

use crate::clients::{Registration, ServiceRegistrar};
use crate::envelope::Metadata;
use crate::event::details;
use crate::pipeline::{Stage, StageContext, StageOutcome};
use crate::Result;

/// Announces the entity to the cross-service registrar.
pub struct RegistrationStage;

#[async_trait]
impl Stage for RegistrationStage {
    fn name(&self) -> &'static str {
        "register"
    }

    async fn run(&self, ctx: &StageContext<'_>, meta: &Metadata) -> Result<StageOutcome> {
        let registrar = ctx.resolver.resolve::<dyn ServiceRegistrar>()?;
        registrar
            .register(Registration {
                entity_type: ctx.entity_type.to_string(),
                entity_id: ctx.entity_id.to_string(),
                domain: ctx.domain.to_string(),
                metadata: meta.to_value()?,
            })
            .await?;

        Ok(StageOutcome::Completed(details([("entity_type", json!(ctx.entity_type))])))
    }
}
