//! Bucket reset: delete every object before the new tree is uploaded

use tracing::{debug, info, instrument, warn};

use crate::error::{MirrorError, Result};
use crate::s3::ObjectStore;

/// Delete every object in the store's bucket, one listing page at a time.
///
/// Each page's keys go out in a single bulk delete; listing continues while
/// the response is truncated. Returns the number of deleted objects. Any
/// listing failure, delete failure, or per-key error inside a delete response
/// aborts the reset.
#[instrument(skip(store), fields(bucket = %store.bucket()))]
pub async fn clear_bucket(store: &dyn ObjectStore) -> Result<usize> {
    let clear_error = |message: String| MirrorError::BucketClearFailure {
        bucket: store.bucket().to_string(),
        message,
    };

    let mut continuation_token: Option<String> = None;
    let mut total_deleted = 0usize;
    let mut pages = 0usize;

    loop {
        let page = store
            .list_page(continuation_token.as_deref())
            .await
            .map_err(|e| clear_error(format!("list failed: {}", e)))?;
        pages += 1;

        let keys = page.keys();
        if !keys.is_empty() {
            let response = store
                .delete_objects(&keys)
                .await
                .map_err(|e| clear_error(format!("delete failed: {}", e)))?;

            if let Some(first) = response.errors.first() {
                for error in &response.errors {
                    warn!(key = %error.key, code = %error.code, "object not deleted");
                }
                return Err(clear_error(format!(
                    "{} key(s) not deleted, first {}: {} - {}",
                    response.errors.len(),
                    first.key,
                    first.code,
                    first.message
                )));
            }

            total_deleted += keys.len();
            debug!(page = pages, deleted = keys.len(), "page cleared");
        }

        if !page.is_truncated {
            break;
        }
        match page.next_continuation_token {
            Some(token) if !token.is_empty() => continuation_token = Some(token),
            _ => {
                return Err(clear_error(
                    "listing truncated without a continuation token".to_string(),
                ))
            }
        }
    }

    info!(deleted = total_deleted, pages, "bucket cleared");
    Ok(total_deleted)
}
