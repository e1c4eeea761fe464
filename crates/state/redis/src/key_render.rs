use refundry_state::StateKey;

/// Render a [`StateKey`] into a Redis key string with the given prefix.
///
/// The format is `prefix:scope:kind:id`.
pub fn render_key(prefix: &str, key: &StateKey) -> String {
    format!("{}:{}:{}:{}", prefix, key.scope, key.kind, key.id)
}

#[cfg(test)]
mod tests {
    use refundry_state::KeyKind;

    use super::*;

    #[test]
    fn renders_standard_key() {
        let key = StateKey::new("m-1", KeyKind::Idempotency, "abc-123");
        let rendered = render_key("refundry", &key);
        assert_eq!(rendered, "refundry:m-1:idempotency:abc-123");
    }

    #[test]
    fn renders_custom_kind() {
        let key = StateKey::new("global", KeyKind::Custom("my_kind".into()), "id-1");
        let rendered = render_key("pfx", &key);
        assert_eq!(rendered, "pfx:global:my_kind:id-1");
    }
}
