// SPDX-License-Identifier: MPL-2.0

//! Integration tests for frame composition

use livecapture::compose::{CompositionRequest, Compositor, SourceView};
use livecapture::frame::{FrameData, OverlayImage, VideoFormat, VideoFrame};
use livecapture::geometry::SampleMap;

fn solid_frame(width: u32, height: u32, fill: [u8; 4], pts: f64) -> VideoFrame {
    let mut data = Vec::with_capacity((width * height * 4) as usize);
    for _ in 0..width * height {
        data.extend_from_slice(&fill);
    }
    VideoFrame {
        data: FrameData::new(data),
        format: VideoFormat::rgba(width, height),
        pts,
    }
}

fn gradient_frame(width: u32, height: u32) -> VideoFrame {
    let mut data = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        for x in 0..width {
            data.extend_from_slice(&[(x * 16) as u8, (y * 16) as u8, 0, 255]);
        }
    }
    VideoFrame {
        data: FrameData::new(data),
        format: VideoFormat::rgba(width, height),
        pts: 0.0,
    }
}

fn full_view(frame: &VideoFrame) -> SourceView<'_> {
    SourceView {
        frame,
        map: SampleMap::identity(),
        quad: [
            0,
            0,
            frame.format.width as i32,
            frame.format.height as i32,
        ],
    }
}

#[test]
fn identity_composition_copies_the_source() {
    let frame = gradient_frame(4, 4);
    let mut compositor = Compositor::new_cpu(4, 4);
    let mut out = vec![0u8; 4 * 4 * 4];
    compositor
        .render(
            &CompositionRequest {
                main: full_view(&frame),
                pip: None,
                overlay: None,
            },
            &mut out,
        )
        .unwrap();
    assert_eq!(&out[..], &frame.data[..]);
}

#[test]
fn destination_size_mismatch_is_rejected() {
    let frame = gradient_frame(4, 4);
    let mut compositor = Compositor::new_cpu(4, 4);
    let mut out = vec![0u8; 7];
    let result = compositor.render(
        &CompositionRequest {
            main: full_view(&frame),
            pip: None,
            overlay: None,
        },
        &mut out,
    );
    assert!(result.is_err());
}

#[test]
fn pip_replaces_main_inside_its_quad() {
    let blue = solid_frame(4, 4, [0, 0, 255, 255], 0.0);
    let red = solid_frame(4, 4, [255, 0, 0, 255], 0.0);
    let mut compositor = Compositor::new_cpu(4, 4);
    let mut out = vec![0u8; 4 * 4 * 4];
    compositor
        .render(
            &CompositionRequest {
                main: SourceView {
                    quad: [0, 0, 2, 4],
                    ..full_view(&blue)
                },
                pip: Some(SourceView {
                    quad: [2, 0, 4, 2],
                    ..full_view(&red)
                }),
                overlay: None,
            },
            &mut out,
        )
        .unwrap();

    let pixel = |x: usize, y: usize| &out[(y * 4 + x) * 4..(y * 4 + x) * 4 + 4];
    assert_eq!(pixel(0, 0), [0, 0, 255, 255], "main quad keeps the main source");
    assert_eq!(pixel(1, 3), [0, 0, 255, 255]);
    assert_eq!(pixel(3, 0), [255, 0, 0, 255], "pip quad replaces main");
    assert_eq!(pixel(2, 1), [255, 0, 0, 255]);
    assert_eq!(pixel(3, 3), [0, 0, 0, 255], "outside both quads is black");
}

#[test]
fn overlay_composites_on_top() {
    let gray = solid_frame(2, 2, [100, 100, 100, 255], 0.0);
    // Opaque red at the top-left, fully transparent elsewhere.
    let mut overlay_bytes = vec![0u8; 2 * 2 * 4];
    overlay_bytes[..4].copy_from_slice(&[255, 0, 0, 255]);
    let overlay = OverlayImage {
        data: FrameData::new(overlay_bytes),
        width: 2,
        height: 2,
    };

    let mut compositor = Compositor::new_cpu(2, 2);
    let mut out = vec![0u8; 2 * 2 * 4];
    compositor
        .render(
            &CompositionRequest {
                main: full_view(&gray),
                pip: None,
                overlay: Some(&overlay),
            },
            &mut out,
        )
        .unwrap();

    assert_eq!(&out[..4], &[255, 0, 0, 255]);
    for pixel in out[4..].chunks_exact(4) {
        assert_eq!(pixel, [100, 100, 100, 255]);
    }
}

#[test]
fn preferred_backend_matches_cpu_output() {
    // When no GPU is present the preferred compositor falls back to the CPU
    // and this compares the CPU with itself.
    let frame = gradient_frame(8, 8);
    let request = CompositionRequest {
        main: full_view(&frame),
        pip: None,
        overlay: None,
    };

    let mut preferred = Compositor::new(8, 8, true);
    let mut cpu = Compositor::new_cpu(8, 8);
    let mut out_preferred = vec![0u8; 8 * 8 * 4];
    let mut out_cpu = vec![0u8; 8 * 8 * 4];
    preferred.render(&request, &mut out_preferred).unwrap();
    cpu.render(&request, &mut out_cpu).unwrap();
    assert_eq!(out_preferred, out_cpu);
}
