//! NATS message producer for scoring decisions

use crate::types::ScoringResponse;
use anyhow::Result;
use async_nats::{Client, Subject};
use tracing::debug;

/// Publishes scoring responses to the decision subject and to request replies
#[derive(Clone)]
pub struct DecisionProducer {
    client: Client,
    subject: String,
}

impl DecisionProducer {
    pub fn new(client: Client, subject: &str) -> Self {
        Self {
            client,
            subject: subject.to_string(),
        }
    }

    /// Publish a response on the decision subject
    pub async fn publish(&self, response: &ScoringResponse) -> Result<()> {
        let payload = serde_json::to_vec(response)?;
        self.client
            .publish(self.subject.clone(), payload.into())
            .await?;

        debug!(
            transaction_id = %response.transaction_id,
            decision = response.decision.as_str(),
            risk_score = response.risk_score,
            "Published scoring decision"
        );
        Ok(())
    }

    /// Answer a request-reply caller directly
    pub async fn reply(&self, reply_to: Subject, response: &ScoringResponse) -> Result<()> {
        let payload = serde_json::to_vec(response)?;
        self.client.publish(reply_to, payload.into()).await?;
        Ok(())
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }
}

#[cfg(test)]
mod tests {
    use crate::types::{Decision, RiskFactor, ScoringDecision};

    #[test]
    fn test_response_payload_shape() {
        let response = ScoringDecision {
            transaction_id: "tx_1".to_string(),
            probability: 0.91234,
            decision: Decision::Block,
            risk_factors: vec![RiskFactor {
                feature: "amount".to_string(),
                contribution: 4.2,
            }],
        }
        .into_response(1.5, "v1");

        let json: serde_json::Value = serde_json::to_value(&response).unwrap();
        assert_eq!(json["decision"], "BLOCK");
        assert_eq!(json["risk_score"], 91.23);
        assert_eq!(json["model_version"], "v1");
        assert_eq!(json["risk_factors"][0]["feature"], "amount");
    }
}
