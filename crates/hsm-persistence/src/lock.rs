//! `RedisConcurrencyGate`: named exclusive lock `mre:<root_event_id>`
//! taken around send-and-persist, backed by Redis `SET NX PX` with a
//! compare-and-delete Lua script on release so a guard never frees a lock it
//! doesn't own (e.g. after its own timeout already expired and someone else
//! acquired it).

use hsm_core::errors::CoreError;
use hsm_core::{ConcurrencyGate, LockGuard};
use std::sync::Arc;
use std::time::{Duration, Instant};
use ulid::Ulid;
use uuid::Uuid;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Released via a Lua script that only deletes the key when its value still
/// matches the token this guard set, so a guard can never release a lock
/// acquired by a different holder after its own lease expired.
const RELEASE_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

pub struct RedisConcurrencyGate {
    client: redis::Client,
    lock_timeout: Duration,
}

impl RedisConcurrencyGate {
    pub fn new(url: &str, lock_timeout_secs: u64) -> redis::RedisResult<Self> {
        Ok(Self {
            client: redis::Client::open(url)?,
            lock_timeout: Duration::from_secs(lock_timeout_secs),
        })
    }

    fn lock_key(root_event_id: Ulid) -> String {
        format!("mre:{root_event_id}")
    }
}

impl ConcurrencyGate for RedisConcurrencyGate {
    fn acquire(&self, root_event_id: Ulid) -> Result<Box<dyn LockGuard>, CoreError> {
        let key = Self::lock_key(root_event_id);
        let token = Uuid::new_v4().to_string();
        let mut conn = self
            .client
            .get_connection()
            .map_err(|e| CoreError::Internal(format!("redis connect: {e}")))?;

        let deadline = Instant::now() + self.lock_timeout;
        loop {
            let acquired: bool = redis::cmd("SET")
                .arg(&key)
                .arg(&token)
                .arg("NX")
                .arg("PX")
                .arg(self.lock_timeout.as_millis() as u64)
                .query(&mut conn)
                .map(|v: Option<String>| v.is_some())
                .map_err(|e| CoreError::Internal(format!("redis SET NX: {e}")))?;

            if acquired {
                return Ok(Box::new(RedisLockGuard {
                    client: self.client.clone(),
                    key,
                    token,
                }));
            }

            if Instant::now() >= deadline {
                return Err(CoreError::AlreadyRunning(root_event_id.to_string()));
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

struct RedisLockGuard {
    client: redis::Client,
    key: String,
    token: String,
}

impl LockGuard for RedisLockGuard {}

impl Drop for RedisLockGuard {
    fn drop(&mut self) {
        let Ok(mut conn) = self.client.get_connection() else {
            log::warn!("RedisLockGuard::drop: failed to connect to release {}", self.key);
            return;
        };
        let script = redis::Script::new(RELEASE_SCRIPT);
        let result: redis::RedisResult<i64> = script.key(&self.key).arg(&self.token).invoke(&mut conn);
        if let Err(e) = result {
            log::warn!("RedisLockGuard::drop: failed to release {}: {e}", self.key);
        }
    }
}

/// Shareable handle (`Arc<RedisConcurrencyGate>` behind the `ConcurrencyGate`
/// trait object) for the root crate's `MachineRuntime`, which is cloned
/// across worker threads.
pub type SharedConcurrencyGate = Arc<dyn ConcurrencyGate>;
