//! Existence and type check for file, directory and fifo services

use async_trait::async_trait;
use tracing::trace;

use crate::check::{Check, CheckContext, Sample};
use crate::event::EventKind;
use crate::service::ServiceKind;

pub struct PathCheck;

fn type_matches(kind: ServiceKind, metadata: &std::fs::Metadata) -> bool {
    let file_type = metadata.file_type();
    match kind {
        ServiceKind::File => file_type.is_file(),
        ServiceKind::Directory => file_type.is_dir(),
        #[cfg(unix)]
        ServiceKind::Fifo => std::os::unix::fs::FileTypeExt::is_fifo(&file_type),
        _ => true,
    }
}

#[async_trait]
impl Check for PathCheck {
    fn name(&self) -> &str {
        "path"
    }

    async fn run(&self, ctx: &CheckContext) -> Vec<Sample> {
        let Some(path) = &ctx.path else {
            return Vec::new();
        };

        let metadata = match tokio::fs::metadata(path).await {
            Ok(metadata) => metadata,
            Err(e) => {
                trace!("{}: stat {} failed: {e}", ctx.service, path.display());
                return vec![Sample::failed(
                    EventKind::Nonexist,
                    format!("{} doesn't exist", ctx.kind),
                )];
            }
        };

        let mut samples = vec![Sample::succeeded(
            EventKind::Nonexist,
            format!("{} exists", ctx.kind),
        )];

        if type_matches(ctx.kind, &metadata) {
            samples.push(Sample::succeeded(
                EventKind::Invalid,
                format!("{} has valid type", ctx.kind),
            ));
        } else {
            samples.push(Sample::failed(
                EventKind::Invalid,
                format!("{} is not a {}", path.display(), ctx.kind),
            ));
        }

        samples
    }
}
