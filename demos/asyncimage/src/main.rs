use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;

use anyhow::Context;
use retain_core::prelude::*;
use retain_surface::*;

mod widgets;

const MAX_FRAMES: u64 = 64;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // `asyncimage [URL]`: fetch URL, or paint a solid square when none is given.
    let source = std::env::args().nth(1);

    let backend = Arc::new(MemoryBackend::new());
    let (wake_tx, wake_rx) = mpsc::channel::<()>();
    let redraw = RedrawHandle::with_waker(move || {
        let _ = wake_tx.send(());
    });
    let mut rt = Runtime::new(RuntimeConfig::default().entry_warn_threshold(32))
        .with_redraw(redraw);

    let mut show_popup = true;
    loop {
        let shown = rt
            .run_frame(|cx| -> anyhow::Result<widgets::Shown> {
                app(cx, backend.clone(), source.as_deref(), show_popup)
            })
            .with_context(|| format!("frame {} failed", rt.frame()))?;
        let frame = rt.frame();
        log::info!(
            "frame {frame}: clicks={} image={} texture={:?}",
            shown.clicks,
            shown.image,
            shown.texture
        );

        // The popup closes after the first frame; its state is swept.
        show_popup = false;

        if matches!(shown.image, LoadState::Success | LoadState::Failure) {
            break;
        }
        anyhow::ensure!(frame < MAX_FRAMES, "image still {} after {frame} frames", shown.image);

        // Idle until the loader asks for a redraw.
        if !rt.take_redraw() {
            let _ = wake_rx.recv_timeout(Duration::from_millis(250));
            rt.take_redraw();
        }
    }

    log::info!(
        "done: {} live entries ({:?}), {} textures bound, {} released",
        rt.store().len(),
        rt.store().keys(),
        backend.binds(),
        backend.releases()
    );
    drop(rt);
    log::info!("after shutdown: {} textures live", backend.live());
    Ok(())
}

fn app(
    cx: &mut BuildCx<'_>,
    backend: Arc<MemoryBackend>,
    source: Option<&str>,
    show_popup: bool,
) -> anyhow::Result<widgets::Shown> {
    let clicks = widgets::counter(cx, Some("clicks"))?;
    if show_popup {
        widgets::popup(cx, "Loading image")?;
    }
    // The popup comes and goes, so the image names itself to keep its key.
    let (image, texture) = widgets::async_image(cx, Some("hero"), backend, source)?;
    Ok(widgets::Shown {
        clicks,
        image,
        texture,
    })
}
