mod site;

use vane::vfs::{NativeFs, RemovableMedia};
use vane::{Config, Server, Vfs};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let cfg = Config::load()?;

    let mut vfs = Vfs::new().with_backend(site::backend());
    if let Some(mount) = &cfg.media_root {
        vfs = vfs.with_backend(RemovableMedia::new(mount));
    }
    if let Some(root) = &cfg.doc_root {
        vfs = vfs.with_backend(NativeFs::new(root).writable(cfg.allow_put));
    }

    let mut server = Server::new(cfg, vfs, site::hooks())?;
    server.bind()?;
    let handle = server.handle();

    // the reactor owns a thread of its own
    let mut reactor = tokio::task::spawn_blocking(move || server.run());

    tokio::select! {
        res = &mut reactor => {
            res??;
        }

        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
            handle.stop();
            reactor.await??;
        }
    }

    Ok(())
}
