use streamspace_types::Error as CoreError;

/// Maps a `sqlx` failure onto the stable error vocabulary from §7:
/// constraint violations become `Invalid`/`Conflict`, everything else
/// (connection loss, pool exhaustion, timeouts) becomes `Upstream` and is
/// retryable per §4.1.
pub fn map_sqlx_error(err: sqlx::Error) -> CoreError {
    match &err {
        sqlx::Error::Database(db_err) => {
            if db_err.is_unique_violation() {
                CoreError::Conflict(db_err.message().to_string())
            } else if db_err.is_check_violation() || db_err.is_foreign_key_violation() {
                CoreError::Invalid(db_err.message().to_string())
            } else {
                CoreError::Upstream(db_err.message().to_string())
            }
        }
        sqlx::Error::RowNotFound => CoreError::NotFound,
        other => CoreError::Upstream(other.to_string()),
    }
}
