use std::sync::Arc;

use retain_core::prelude::*;
use retain_surface::*;

pub struct Shown {
    pub clicks: u32,
    pub image: LoadState,
    pub texture: TextureId,
}

/// A button that "clicks" itself once per frame.
pub fn counter(cx: &mut BuildCx<'_>, id: Option<&str>) -> Result<u32, StateError> {
    let key = cx.key(id, "Button");
    let clicks = cx.remember_state(&key, || 0u32)?;
    clicks.update(|n| *n += 1);
    Ok(clicks.get())
}

/// A popup whose open flag lives only while the popup is shown.
pub fn popup(cx: &mut BuildCx<'_>, title: &str) -> Result<(), StateError> {
    let key = cx.key(None, "Popup");
    let open = cx.remember_state(&key, || true)?;
    let title = title.to_string();
    cx.disposable_effect(&format!("{key}/effect"), open.get(), move || {
        log::info!("popup '{title}' opened");
        on_unmount(move || log::info!("popup '{title}' closed"))
    })?;
    Ok(())
}

/// An image widget that starts loading on first build and shows the
/// placeholder until the pixels arrive.
pub fn async_image(
    cx: &mut BuildCx<'_>,
    id: Option<&str>,
    backend: Arc<MemoryBackend>,
    source: Option<&str>,
) -> anyhow::Result<(LoadState, TextureId)> {
    let image = StatefulSurface::remember(cx, id, "AsyncImage", backend)?;
    if image.state() == LoadState::Idle {
        image
            .on_loading(|| log::info!("image loading"))
            .on_success(|| log::info!("image loaded"))
            .on_failure(|err| log::error!("image failed: {err}"));
        match source {
            Some(url) => image.load_surface(UrlLoader::new(url))?,
            None => image.load_surface(UniformLoader::new(64, 64, Color::from_hex("#3B82F6")))?,
        }
    }
    Ok((image.state(), image.texture()))
}
