use crate::scheduler::StatsSnapshot;

/// What the overlay shows for one render tick.
#[derive(Debug, Clone, Copy)]
pub struct HudInfo {
    pub stats: StatsSnapshot,
    pub active_index: Option<u64>,
    pub source_count: usize,
    pub fps: u32,
    pub placed: bool,
    pub playing: bool,
}

fn format_drift(drift: Option<f64>) -> String {
    match drift {
        Some(d) => format!("{:+.1} ms", d * 1000.0),
        None => "n/a".to_owned(),
    }
}

fn format_frame(info: &HudInfo) -> String {
    match info.active_index {
        Some(i) if info.source_count > 0 => {
            format!("{i} ({} / {})", i % info.source_count as u64, info.source_count)
        }
        _ => "-".to_owned(),
    }
}

pub fn draw_hud(ctx: &egui::Context, info: &HudInfo) {
    egui::Window::new("Playback")
        .anchor(egui::Align2::LEFT_TOP, [10.0, 10.0])
        .resizable(false)
        .collapsible(true)
        .show(ctx, |ui| {
            egui::Grid::new("playback_stats")
                .num_columns(2)
                .show(ui, |ui| {
                    ui.label("frame");
                    ui.label(format_frame(info));
                    ui.end_row();

                    ui.label("rate");
                    ui.label(format!("{} fps", info.fps));
                    ui.end_row();

                    ui.label("published");
                    ui.label(info.stats.published.to_string());
                    ui.end_row();

                    ui.label("dropped");
                    ui.label(info.stats.dropped.to_string());
                    ui.end_row();

                    ui.label("failed");
                    ui.label(info.stats.failed.to_string());
                    ui.end_row();

                    ui.label("audio drift");
                    ui.label(format_drift(info.stats.last_drift));
                    ui.end_row();
                });

            ui.separator();
            if !info.playing {
                ui.colored_label(egui::Color32::YELLOW, "stopped");
            }
            if !info.placed {
                ui.colored_label(egui::Color32::LIGHT_RED, "not placed (P to place)");
            }
            ui.weak("Space: restart   P: toggle placement");
        });
}
