// Entity collections kept warm by the daemon.

use serde_json::Value;

use crate::api::DataRequest;
use crate::error::FetchResult;

/// A list endpoint plus the per-member endpoint it fans out to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collection {
    pub name: &'static str,
    pub list_key: &'static str,
    pub member_key: &'static str,
    /// Field holding the member id when list items are objects.
    pub id_field: &'static str,
}

impl Collection {
    pub fn list_request(&self) -> FetchResult<DataRequest> {
        DataRequest::new(self.list_key)
    }

    pub fn member_request(&self, id: &str) -> FetchResult<DataRequest> {
        DataRequest::new(self.member_key)?.with_sub_key(id)
    }

    /// Member ids in a list payload. Accepts a bare array or `{data: [...]}`
    /// of strings or objects carrying `id_field`.
    pub fn member_ids(&self, payload: &Value) -> Vec<String> {
        let items = match payload {
            Value::Array(items) => items,
            Value::Object(map) => match map.get("data").or_else(|| map.get(self.list_key)) {
                Some(Value::Array(items)) => items,
                _ => return Vec::new(),
            },
            _ => return Vec::new(),
        };

        items
            .iter()
            .filter_map(|item| match item {
                Value::String(id) => Some(id.clone()),
                Value::Object(fields) => match fields.get(self.id_field) {
                    Some(Value::String(id)) => Some(id.clone()),
                    Some(Value::Number(n)) => Some(n.to_string()),
                    _ => None,
                },
                _ => None,
            })
            .filter(|id| !id.is_empty())
            .collect()
    }
}

pub const SPECS: Collection = Collection {
    name: "specs",
    list_key: "specs",
    member_key: "spec",
    id_field: "chainId",
};

pub const CONSUMERS: Collection = Collection {
    name: "consumers",
    list_key: "consumers",
    member_key: "consumer",
    id_field: "address",
};

pub const PROVIDERS: Collection = Collection {
    name: "providers",
    list_key: "providers",
    member_key: "provider",
    id_field: "address",
};

/// Revalidation order.
pub fn default_catalog() -> Vec<Collection> {
    vec![SPECS, CONSUMERS, PROVIDERS]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_member_ids_shapes() {
        assert_eq!(PROVIDERS.member_ids(&json!(["lava@1", "lava@2"])), vec!["lava@1", "lava@2"]);
        assert_eq!(
            SPECS.member_ids(&json!({"data": [{"chainId": "LAV1"}, {"chainId": "ETH1"}, {"name": "x"}]})),
            vec!["LAV1", "ETH1"]
        );
        assert_eq!(
            CONSUMERS.member_ids(&json!({"consumers": [{"address": "lava@c1"}]})),
            vec!["lava@c1"]
        );
        assert!(PROVIDERS.member_ids(&json!({"error": "down"})).is_empty());
        assert!(PROVIDERS.member_ids(&json!(42)).is_empty());
    }

    #[test]
    fn test_member_request_path() {
        let request = PROVIDERS.member_request("lava@1abc").unwrap();
        assert_eq!(request.path(), "/provider/lava@1abc");
        assert_eq!(SPECS.list_request().unwrap().cache_key(), "/specs");
    }

    #[test]
    fn test_catalog_order() {
        let names: Vec<&str> = default_catalog().iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["specs", "consumers", "providers"]);
    }
}
