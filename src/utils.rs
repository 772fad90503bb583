use crate::peer::types::ServerConfig;
use rand::Rng;

pub fn random_id() -> String {
    hex::encode(rand::rng().random::<[u8; 8]>())
}

// Добавляет схему протокола к URL ICE сервера, если она отсутствует
pub fn add_ice_url_scheme(config: &ServerConfig) -> String {
    // Если url уже начинается с "turn:" или "stun:", возвращаем как есть
    if config.url.starts_with("turn:")
        || config.url.starts_with("turns:")
        || config.url.starts_with("stun:")
    {
        config.url.clone()
    } else {
        // В зависимости от типа сервера добавляем нужную схему
        let scheme = if config.r#type == "turn" {
            "turn:"
        } else {
            "stun:"
        };
        format!("{}{}", scheme, config.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(kind: &str, url: &str) -> ServerConfig {
        ServerConfig {
            id: "s".into(),
            r#type: kind.into(),
            url: url.into(),
            username: None,
            credential: None,
        }
    }

    #[test]
    fn random_id_is_sixteen_hex_chars() {
        let id = random_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, random_id());
    }

    #[test]
    fn scheme_is_added_by_server_type() {
        assert_eq!(
            add_ice_url_scheme(&server("turn", "relay.example.org:3478")),
            "turn:relay.example.org:3478"
        );
        assert_eq!(
            add_ice_url_scheme(&server("stun", "stun.example.org:19302")),
            "stun:stun.example.org:19302"
        );
    }

    #[test]
    fn existing_scheme_is_kept() {
        assert_eq!(
            add_ice_url_scheme(&server("turn", "stun:stun.example.org")),
            "stun:stun.example.org"
        );
    }
}
