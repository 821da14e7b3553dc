//! Topic text to [`Subscription`].

use super::subscription::{Subscription, SubscriptionKind};
use crate::config::CoreSettings;
use crate::error::{QueryError, Result};
use crate::expression::Query;
use crate::path::{parse_path, percent_decode};
use crate::sql::Compiler;
use crate::types::IdManager;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Everything needed to turn topics into subscriptions.
///
/// Built once from [`CoreSettings`] and shared by reference.
#[derive(Clone)]
pub struct SubscriptionContext {
    ids: Arc<dyn IdManager>,
    service_root_url: String,
    topic_prefix: Option<String>,
}

impl SubscriptionContext {
    pub fn new(settings: &CoreSettings) -> Self {
        Self {
            ids: settings.id_manager(),
            service_root_url: settings.service_root_url.clone(),
            topic_prefix: settings.effective_topic_prefix().map(str::to_string),
        }
    }

    pub fn id_manager(&self) -> &dyn IdManager {
        self.ids.as_ref()
    }

    /// Parse `[prefix]path[?options]` into a subscription.
    ///
    /// Shape errors are returned. A topic whose query options can not be
    /// parsed or typed is logged and yields `Ok(None)`.
    pub fn subscription(&self, topic: &str) -> Result<Option<Subscription>> {
        let unprefixed = match &self.topic_prefix {
            Some(prefix) => topic.strip_prefix(prefix.as_str()).ok_or_else(|| {
                info!(topic, prefix = %prefix, "rejecting topic without prefix");
                QueryError::topic(topic, format!("topic does not start with '{}'", prefix))
            })?,
            None => topic,
        };
        if unprefixed.is_empty() {
            return Err(QueryError::topic(topic, "topic is empty"));
        }
        if unprefixed.starts_with('/') {
            return Err(QueryError::topic(topic, "topic must not start with '/'"));
        }
        let (path_text, options) = unprefixed.split_once('?').unwrap_or((unprefixed, ""));
        let decoded = percent_decode(path_text)?;
        let path = parse_path(self.id_manager(), &self.service_root_url, &format!("/{}", decoded))?;
        if path.is_empty() {
            return Err(QueryError::InvalidPath(format!("topic '{}' has no path", topic)));
        }
        let (kind, entity_type) = Subscription::classify(&path)?;
        if matches!(kind, SubscriptionKind::Property(_)) && !options.trim().is_empty() {
            return Err(QueryError::QueryOptionsNotAllowed(format!(
                "property topic '{}' can not carry query options",
                topic
            )));
        }

        let query = match Query::parse(options) {
            Ok(query) => query,
            Err(e) => {
                warn!(topic, error = %e, "dropping subscription with invalid query options");
                return Ok(None);
            }
        };
        if let Some(filter) = &query.filter {
            let mut compiler = Compiler::new(self.id_manager(), entity_type);
            if let Err(e) = compiler.compile_filter(filter) {
                warn!(topic, error = %e, "dropping subscription with untypable filter");
                return Ok(None);
            }
        }

        let subscription = Subscription::new(topic.to_string(), path, query.filter, query.select)?;
        debug!(
            topic,
            entity_type = %entity_type,
            kind = ?subscription.kind(),
            has_filter = subscription.filter().is_some(),
            "built subscription"
        );
        Ok(Some(subscription))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntityProperty, EntityType, Property};

    fn context(prefix: Option<&str>) -> SubscriptionContext {
        SubscriptionContext::new(&CoreSettings {
            topic_prefix: prefix.map(str::to_string),
            ..Default::default()
        })
    }

    #[test]
    fn test_prefix_is_required_once_configured() {
        let ctx = context(Some("v1.1/"));
        let subscription = ctx.subscription("v1.1/Things(1)").unwrap().unwrap();
        assert_eq!(subscription.entity_type(), EntityType::Thing);
        assert_eq!(subscription.topic(), "v1.1/Things(1)");
        assert!(matches!(
            ctx.subscription("Things(1)"),
            Err(QueryError::InvalidTopic { .. })
        ));
    }

    #[test]
    fn test_topic_shape_errors() {
        let ctx = context(None);
        for topic in ["", "/Things", "Things(1)/nope", "Nothing"] {
            let err = ctx.subscription(topic).unwrap_err();
            assert!(err.is_structural(), "{}: {}", topic, err);
        }
    }

    #[test]
    fn test_property_topic_rejects_options() {
        let ctx = context(None);
        for topic in ["Things(3)/name?$filter=id eq 3", "Things(3)/name?$select=name"] {
            assert!(matches!(
                ctx.subscription(topic),
                Err(QueryError::QueryOptionsNotAllowed(_))
            ));
        }
        let subscription = ctx.subscription("Things(3)/Name").unwrap().unwrap();
        assert_eq!(
            subscription.kind(),
            &SubscriptionKind::Property(Property::Entity(EntityProperty::Name))
        );
    }

    #[test]
    fn test_bad_filter_yields_no_subscription() {
        let ctx = context(None);
        assert!(ctx.subscription("Things?$filter=name eq").unwrap().is_none());
        assert!(ctx.subscription("Things?$filter=name div 2 eq 1").unwrap().is_none());
        assert!(ctx.subscription("Things?$filter=name eq 'a'").unwrap().is_some());
    }

    #[test]
    fn test_out_of_range_duration_yields_no_subscription() {
        let ctx = context(None);
        let topic = "Observations?$filter=resultTime add duration'P1DT99999999999999999H' gt now()";
        assert!(ctx.subscription(topic).unwrap().is_none());
    }

    #[test]
    fn test_encoded_literals_survive() {
        let ctx = context(None);
        let subscription = ctx
            .subscription("Things?$filter=name%20eq%20'a%26b'&$select=name")
            .unwrap()
            .unwrap();
        assert!(subscription.filter().is_some());
        assert_eq!(subscription.selected(), vec![Property::Entity(EntityProperty::Name)]);
    }

    #[test]
    fn test_string_ids() {
        let ctx = SubscriptionContext::new(&CoreSettings {
            id_scheme: crate::types::IdScheme::String,
            ..Default::default()
        });
        let subscription = ctx.subscription("Things('a%2Fb')/Datastreams").unwrap().unwrap();
        assert_eq!(subscription.entity_type(), EntityType::Datastream);
        assert!(subscription.identity().is_some());
    }
}
