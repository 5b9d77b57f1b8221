use futures_util::{Stream, StreamExt};

use super::{RelayError, RelayEvent};

/// Everything a relayed call produced, for non-streaming responses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayOutcome {
    pub text: String,
    /// Media URLs in delivery order.
    pub media: Vec<String>,
    pub rotations: u32,
    pub delivered: u32,
}

/// Drive a relay stream to its terminal event.
///
/// # Errors
///
/// Returns the terminal [`RelayError`], or [`RelayError::Upstream`] if the
/// stream ends without a terminal event.
pub async fn collect<S>(events: S) -> Result<RelayOutcome, RelayError>
where
    S: Stream<Item = RelayEvent>,
{
    let mut events = std::pin::pin!(events);
    let mut outcome = RelayOutcome::default();
    while let Some(event) = events.next().await {
        match event {
            RelayEvent::Text(text) => outcome.text.push_str(&text),
            RelayEvent::Progress { .. } => {}
            RelayEvent::Media { url, .. } => outcome.media.push(url),
            RelayEvent::Rotation { .. } => outcome.rotations += 1,
            RelayEvent::Done { delivered } => {
                outcome.delivered = delivered;
                return Ok(outcome);
            }
            RelayEvent::Failed(err) => return Err(err),
        }
    }
    Err(RelayError::Upstream(
        "relay ended without a terminal event".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    #[tokio::test]
    async fn test_collect_assembles_outcome() {
        let events = stream::iter(vec![
            RelayEvent::Text("Hello ".into()),
            RelayEvent::Media {
                url: "https://a.example/1.png".into(),
                index: 0,
            },
            RelayEvent::Rotation {
                attempt: 1,
                max: 5,
                reason: "busy".into(),
            },
            RelayEvent::Text("world".into()),
            RelayEvent::Done { delivered: 1 },
            RelayEvent::Text("ignored".into()),
        ]);
        let outcome = collect(events).await.unwrap();
        assert_eq!(outcome.text, "Hello world");
        assert_eq!(outcome.media, ["https://a.example/1.png"]);
        assert_eq!(outcome.rotations, 1);
        assert_eq!(outcome.delivered, 1);
    }

    #[tokio::test]
    async fn test_collect_surfaces_failure() {
        let events = stream::iter(vec![
            RelayEvent::Text("partial".into()),
            RelayEvent::Failed(RelayError::PoolExhausted("none".into())),
        ]);
        assert_eq!(
            collect(events).await,
            Err(RelayError::PoolExhausted("none".into()))
        );
    }

    #[tokio::test]
    async fn test_missing_terminal_is_an_error() {
        let events = stream::iter(vec![RelayEvent::Text("x".into())]);
        assert!(matches!(collect(events).await, Err(RelayError::Upstream(_))));
    }
}
