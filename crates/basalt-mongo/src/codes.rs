//! Server replies that signal "already done". A reply counts when either its
//! code or its message text matches; mongos reports some replays under a
//! generic code such as `IllegalOperation` with only the text to go on.

use basalt_types::BasaltError;

pub const ALREADY_INITIALIZED: i32 = 23;
pub const NOT_YET_INITIALIZED: i32 = 94;
pub const DUPLICATE_KEY: i32 = 11000;
pub const ILLEGAL_OPERATION: i32 = 20;

fn matches(error: &BasaltError, code: i32, phrases: &[&str]) -> bool {
    let Some(failure) = error.command_failure() else {
        return false;
    };
    if failure.code == Some(code) {
        return true;
    }
    let message = failure.message.to_lowercase();
    phrases.iter().any(|phrase| message.contains(phrase))
}

pub fn is_already_initialized(error: &BasaltError) -> bool {
    matches(error, ALREADY_INITIALIZED, &["already initialized"])
}

pub fn is_not_yet_initialized(error: &BasaltError) -> bool {
    matches(error, NOT_YET_INITIALIZED, &["no replset config has been received"])
}

pub fn is_duplicate_shard(error: &BasaltError) -> bool {
    matches(error, DUPLICATE_KEY, &["already exists", "duplicate key"])
}

pub fn is_sharding_already_enabled(error: &BasaltError) -> bool {
    matches(error, ALREADY_INITIALIZED, &["already enabled"])
}

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_types::CommandFailure;

    fn failure(code: Option<(i32, &str)>, message: &str) -> BasaltError {
        let failure = CommandFailure::new("addShard", message);
        match code {
            Some((code, name)) => failure.with_code(code, name).into(),
            None => failure.into(),
        }
    }

    #[test]
    fn code_alone_is_enough() {
        let err = failure(Some((DUPLICATE_KEY, "DuplicateKey")), "something else");
        assert!(is_duplicate_shard(&err));

        let err = failure(Some((13, "Unauthorized")), "not authorized on admin");
        assert!(!is_duplicate_shard(&err));
    }

    #[test]
    fn text_matches_under_a_generic_code() {
        let err = failure(
            Some((ILLEGAL_OPERATION, "IllegalOperation")),
            "A shard named demo-shard0 already exists",
        );
        assert!(is_duplicate_shard(&err));

        let err = failure(Some((ILLEGAL_OPERATION, "IllegalOperation")), "can't add shard");
        assert!(!is_duplicate_shard(&err));
    }

    #[test]
    fn text_is_a_fallback_without_code() {
        assert!(is_duplicate_shard(&failure(None, "E11000 duplicate key error")));
        assert!(is_sharding_already_enabled(&failure(
            None,
            "sharding already enabled for database app"
        )));
        assert!(is_already_initialized(&failure(None, "already initialized")));
        assert!(!is_already_initialized(&failure(None, "not authorized")));
    }

    #[test]
    fn non_command_errors_never_match() {
        let err = BasaltError::Other("already exists".into());
        assert!(!is_duplicate_shard(&err));
    }
}
