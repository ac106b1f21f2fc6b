//! Expiry scan (§4.9): a bulk `DELETE` per map that declares an
//! `expire_field`, each run in its own short transaction so one map's scan
//! can't hold a lock across another's.

use crate::driver::{Execution, SqlConnection};
use crate::error::DictResult;
use crate::map::MapSet;
use crate::query;

/// Runs the expiry scan once across every map in `maps`. Returns the number
/// of maps that carried an `expire_field` (0 means the scan was a no-op;
/// §6 callers use this to decide whether to keep scheduling the sweep).
pub fn expire_scan(conn: &mut dyn SqlConnection, maps: &MapSet, now_epoch_secs: i64) -> DictResult<u32> {
    let mut scanned = 0u32;
    for idx in 0..maps.len() {
        let map = maps.get(idx).unwrap();
        let Some(built) = query::build_expire_delete(map, now_epoch_secs) else {
            continue;
        };
        scanned += 1;

        let mut txn = conn.begin()?;
        match txn.execute(&built.sql, &built.params) {
            Ok(_) => txn.commit()?,
            Err(e) => {
                txn.rollback()?;
                return Err(e);
            }
        }
    }
    Ok(scanned)
}

/// How many rows the last scan actually removed, for callers that want the
/// count rather than just the map tally. Kept separate from `expire_scan`
/// because a caller scanning many maps usually only cares about the total.
pub fn expire_scan_with_count(
    conn: &mut dyn SqlConnection,
    maps: &MapSet,
    now_epoch_secs: i64,
) -> DictResult<(u32, u64)> {
    let mut scanned = 0u32;
    let mut deleted = 0u64;
    for idx in 0..maps.len() {
        let map = maps.get(idx).unwrap();
        let Some(built) = query::build_expire_delete(map, now_epoch_secs) else {
            continue;
        };
        scanned += 1;

        let mut txn = conn.begin()?;
        match txn.execute(&built.sql, &built.params) {
            Ok(Execution::AffectedRows(n)) => {
                deleted += n;
                txn.commit()?;
            }
            Ok(Execution::Rows(_)) => {
                txn.commit()?;
            }
            Err(e) => {
                txn.rollback()?;
                return Err(e);
            }
        }
    }
    Ok((scanned, deleted))
}
