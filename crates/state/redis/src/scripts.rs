//! Lua scripts for the operations that must be atomic at the Redis level.

/// Set `KEYS[1]` to `ARGV[1]` only if neither the plain key nor the versioned
/// hash (`KEYS[2]`) exists. `ARGV[2]` is the TTL in milliseconds (0 = none).
/// Returns 1 when the key was created, 0 otherwise.
pub const CHECK_AND_SET: &str = r"
if redis.call('EXISTS', KEYS[1]) == 1 or redis.call('EXISTS', KEYS[2]) == 1 then
    return 0
end
if tonumber(ARGV[2]) > 0 then
    redis.call('SET', KEYS[1], ARGV[1], 'PX', ARGV[2])
else
    redis.call('SET', KEYS[1], ARGV[1])
end
return 1
";

/// Compare-and-swap on the versioned hash `KEYS[1]`.
/// `ARGV[1]` = expected version, `ARGV[2]` = new value, `ARGV[3]` = TTL ms.
/// Returns `{1, new_version}` on success, `{0, current_version, current_value}`
/// on conflict (version 0 / false value when the key is missing).
pub const COMPARE_AND_SWAP: &str = r"
local ver = redis.call('HGET', KEYS[1], 'ver')
if not ver then
    return {0, 0, false}
end
if tonumber(ver) ~= tonumber(ARGV[1]) then
    return {0, tonumber(ver), redis.call('HGET', KEYS[1], 'v')}
end
local new_ver = tonumber(ver) + 1
redis.call('HSET', KEYS[1], 'v', ARGV[2], 'ver', new_ver)
if tonumber(ARGV[3]) > 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[3])
end
return {1, new_ver}
";

/// Acquire lock `KEYS[1]` for owner `ARGV[1]` with TTL `ARGV[2]` ms.
/// Returns 1 when acquired, 0 when another owner holds it.
pub const LOCK_ACQUIRE: &str = r"
if redis.call('SET', KEYS[1], ARGV[1], 'NX', 'PX', ARGV[2]) then
    return 1
end
return 0
";

/// Extend lock `KEYS[1]` to TTL `ARGV[2]` ms, only if owned by `ARGV[1]`.
/// Returns 1 on success, 0 when the lock is lost.
pub const LOCK_EXTEND: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    redis.call('PEXPIRE', KEYS[1], ARGV[2])
    return 1
end
return 0
";

/// Release lock `KEYS[1]`, only if owned by `ARGV[1]`.
/// Returns 1 when released, 0 when the lock was already lost.
pub const LOCK_RELEASE: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    redis.call('DEL', KEYS[1])
    return 1
end
return 0
";
