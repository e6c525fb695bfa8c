use std::io;
use std::path::Path;

use fuser::MountOption;
use tracing::info;

use crate::fuse::SqlFs;

/// Mount `fs` at `mountpoint` and serve kernel requests until the
/// filesystem is unmounted. Blocks the calling thread; run it on a
/// blocking thread so the store's runtime stays free.
pub fn mount(fs: SqlFs, mountpoint: &Path, allow_other: bool) -> io::Result<()> {
    let mut options = vec![
        MountOption::FSName("sqlfs".to_string()),
        MountOption::DefaultPermissions,
        MountOption::AutoUnmount,
    ];
    if allow_other {
        options.push(MountOption::AllowOther);
    }

    info!(mountpoint = %mountpoint.display(), "mounting sqlfs");
    fuser::mount2(fs, mountpoint, &options)
}
