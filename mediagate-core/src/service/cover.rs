//! Collection cover generation
//!
//! Composes up to nine poster tiles into a square cover with a textual
//! badge derived from the collection type, then uploads it as the
//! collection's primary image. Missing or broken posters leave gaps rather
//! than failing the whole cover.

use std::path::PathBuf;
use std::sync::Arc;

use ab_glyph::{FontVec, PxScale};
use image::{imageops, DynamicImage, Rgba, RgbaImage};
use imageproc::drawing::draw_text_mut;

use mediagate_providers::emby::EmbyClient;

use crate::models::{CollectionKind, CustomCollection, GeneratedItem};
use crate::{Error, Result};

const CANVAS_SIZE: u32 = 600;
const GRID: u32 = 3;
const TILE: u32 = CANVAS_SIZE / GRID;
const BADGE_SCALE: f32 = 44.0;

pub struct CoverGenerator {
    emby: Arc<EmbyClient>,
    api_key: String,
    http: reqwest::Client,
    font_path: PathBuf,
}

impl CoverGenerator {
    pub fn new(emby: Arc<EmbyClient>, api_key: &str, font_directory: &str) -> Result<Self> {
        Ok(Self {
            emby,
            api_key: api_key.to_string(),
            http: mediagate_providers::http::build_client(std::time::Duration::from_secs(30))
                .map_err(|e| Error::Internal(format!("cover http client: {e}")))?,
            font_path: PathBuf::from(font_directory).join("cover.ttf"),
        })
    }

    /// Regenerate a collection's cover from its current contents.
    pub async fn generate_for_collection(
        &self,
        coll: &CustomCollection,
        items: &[GeneratedItem],
    ) -> Result<()> {
        let Some(emby_collection_id) = &coll.emby_collection_id else {
            return Ok(());
        };

        let posters = self.fetch_posters(items).await;
        let badge = badge_text(coll.kind, items.len());
        let cover = compose_cover(&posters, &badge, self.load_font().as_ref());

        // JPEG has no alpha channel; flatten before encoding.
        let rgb = DynamicImage::ImageRgba8(cover).to_rgb8();
        let mut encoded = Vec::new();
        {
            use image::ImageEncoder;
            let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut encoded, 85);
            encoder
                .write_image(
                    rgb.as_raw(),
                    rgb.width(),
                    rgb.height(),
                    image::ExtendedColorType::Rgb8,
                )
                .map_err(|e| Error::Internal(format!("cover encode failed: {e}")))?;
        }

        self.upload_primary_image(emby_collection_id, &encoded)
            .await?;
        tracing::info!(collection = %coll.name, tiles = posters.len(), "封面已更新");
        Ok(())
    }

    async fn fetch_posters(&self, items: &[GeneratedItem]) -> Vec<DynamicImage> {
        let mut posters = Vec::new();
        for item in items.iter().take(9) {
            let Some(emby_id) = &item.emby_item_id else {
                continue;
            };
            let url = format!(
                "{}/emby/Items/{}/Images/Primary?maxWidth=400",
                self.emby.base_url(),
                emby_id
            );
            match self
                .http
                .get(&url)
                .header("X-Emby-Token", &self.api_key)
                .send()
                .await
            {
                Ok(resp) if resp.status().is_success() => {
                    if let Ok(bytes) = resp.bytes().await {
                        if let Ok(img) = image::load_from_memory(&bytes) {
                            posters.push(img);
                        }
                    }
                }
                _ => {}
            }
            if posters.len() == 9 {
                break;
            }
        }
        posters
    }

    fn load_font(&self) -> Option<FontVec> {
        let data = std::fs::read(&self.font_path).ok()?;
        FontVec::try_from_vec(data).ok()
    }

    async fn upload_primary_image(&self, item_id: &str, jpeg: &[u8]) -> Result<()> {
        use base64::Engine;
        let url = format!(
            "{}/emby/Items/{item_id}/Images/Primary",
            self.emby.base_url()
        );
        // The Library Server takes base64-encoded image bodies on this
        // endpoint.
        let body = base64::engine::general_purpose::STANDARD.encode(jpeg);
        self.http
            .post(&url)
            .header("X-Emby-Token", &self.api_key)
            .header("Content-Type", "image/jpeg")
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Internal(format!("cover upload failed: {e}")))?
            .error_for_status()
            .map_err(|e| Error::Internal(format!("cover upload rejected: {e}")))?;
        Ok(())
    }
}

/// Badge text per collection type: 榜单 for lists, 推荐 for personal AI,
/// 热榜 for global AI, the item count for filters, 混合 otherwise.
#[must_use]
pub fn badge_text(kind: CollectionKind, item_count: usize) -> String {
    match kind {
        CollectionKind::List => "榜单".to_string(),
        CollectionKind::AiRecommendation => "推荐".to_string(),
        CollectionKind::AiRecommendationGlobal => "热榜".to_string(),
        CollectionKind::Filter => {
            if item_count > 0 {
                item_count.to_string()
            } else {
                "混合".to_string()
            }
        }
    }
}

/// Pure composition: tile the posters onto the canvas and draw the badge.
/// Tolerates any number of posters including zero.
#[must_use]
pub fn compose_cover(posters: &[DynamicImage], badge: &str, font: Option<&FontVec>) -> RgbaImage {
    let mut canvas = RgbaImage::from_pixel(CANVAS_SIZE, CANVAS_SIZE, Rgba([24, 24, 28, 255]));

    for (idx, poster) in posters.iter().take((GRID * GRID) as usize).enumerate() {
        let idx = idx as u32;
        let tile = poster
            .resize_to_fill(TILE, TILE, imageops::FilterType::Triangle)
            .to_rgba8();
        let x = (idx % GRID) * TILE;
        let y = (idx / GRID) * TILE;
        imageops::overlay(&mut canvas, &tile, i64::from(x), i64::from(y));
    }

    // Darken the lower band so the badge stays readable over posters.
    let band_top = CANVAS_SIZE - 110;
    for y in band_top..CANVAS_SIZE {
        for x in 0..CANVAS_SIZE {
            let pixel = canvas.get_pixel_mut(x, y);
            pixel.0 = [
                pixel.0[0] / 2,
                pixel.0[1] / 2,
                pixel.0[2] / 2,
                255,
            ];
        }
    }

    if let Some(font) = font {
        draw_text_mut(
            &mut canvas,
            Rgba([255, 255, 255, 255]),
            30,
            (band_top + 25) as i32,
            PxScale::from(BADGE_SCALE),
            font,
            badge,
        );
    }

    canvas
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_badge_text_mapping() {
        assert_eq!(badge_text(CollectionKind::List, 12), "榜单");
        assert_eq!(badge_text(CollectionKind::AiRecommendation, 12), "推荐");
        assert_eq!(badge_text(CollectionKind::AiRecommendationGlobal, 12), "热榜");
        assert_eq!(badge_text(CollectionKind::Filter, 12), "12");
        assert_eq!(badge_text(CollectionKind::Filter, 0), "混合");
    }

    #[test]
    fn test_compose_cover_without_posters() {
        let cover = compose_cover(&[], "榜单", None);
        assert_eq!(cover.width(), CANVAS_SIZE);
        assert_eq!(cover.height(), CANVAS_SIZE);
    }

    #[test]
    fn test_compose_cover_with_partial_grid() {
        let poster = DynamicImage::new_rgba8(40, 60);
        let cover = compose_cover(&[poster.clone(), poster], "推荐", None);
        assert_eq!(cover.width(), CANVAS_SIZE);
    }

    #[test]
    fn test_compose_cover_ignores_extra_posters() {
        let poster = DynamicImage::new_rgba8(10, 10);
        let many: Vec<DynamicImage> = (0..12).map(|_| poster.clone()).collect();
        let cover = compose_cover(&many, "9", None);
        assert_eq!(cover.width(), CANVAS_SIZE);
    }
}
