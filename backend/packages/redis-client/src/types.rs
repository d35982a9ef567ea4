use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(bound(deserialize = "T: DeserializeOwned"))]
pub struct RedisRequest<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    pub action: String,
    #[serde(default)]
    pub message: String,
    pub data: T,
}

impl<T> RedisRequest<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    pub fn new(action: impl Into<String>, data: T) -> Self {
        Self {
            action: action.into(),
            message: String::new(),
            data,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(bound(deserialize = "T: DeserializeOwned"))]
pub struct RedisResponse<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    pub status_code: i32,
    pub success: bool,
    pub message: String,
    pub data: T,
}

impl<T> RedisResponse<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    pub fn new(status_code: i32, success: bool, message: impl Into<String>, data: T) -> Self {
        Self {
            status_code,
            success,
            message: message.into(),
            data,
        }
    }

    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self::new(200, true, message, data)
    }
}

impl RedisResponse<serde_json::Value> {
    pub fn error(status_code: i32, message: impl Into<String>) -> Self {
        Self::new(status_code, false, message, serde_json::Value::Null)
    }
}
