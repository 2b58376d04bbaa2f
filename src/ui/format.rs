use std::{fmt::Write, time::Duration};

use crate::audio::{queue::QueuePage, subscription::PlaybackStatus, track::Track};

/// `m:ss`, or `h:mm:ss` past the hour.
pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

fn track_line(track: &Track) -> String {
    if track.duration_seconds > 0 {
        format!("{} `[{}]`", track.title, format_duration(track.duration()))
    } else {
        track.title.clone()
    }
}

pub fn now_playing(status: &PlaybackStatus) -> String {
    let Some(current) = &status.current_track else {
        return "❌ Nothing is playing right now".to_string();
    };

    let mode = if status.loop_single {
        "🔂"
    } else if status.loop_all {
        "🔁"
    } else {
        "▶️"
    };
    let mut out = format!("{} {}", mode, track_line(current));
    if let Some(url) = &current.source_url {
        let _ = write!(out, "\n   {}", url);
    }
    let _ = write!(
        out,
        "\n   requested by <@{}> at {}",
        current.requested_by,
        current.requested_at.format("%H:%M UTC")
    );
    out
}

pub fn queue_page(status: &PlaybackStatus, page: &QueuePage) -> String {
    let mut out = String::from("📋 Queue\n");

    if let Some(current) = &status.current_track {
        let _ = writeln!(out, "Now playing: {}", track_line(current));
    }

    if page.total_items == 0 {
        out.push_str("😴 The queue is empty, use `play <song>` to add music");
        return out;
    }

    for (i, track) in page.items.iter().enumerate() {
        let _ = writeln!(out, "{}. {}", page.first_position + i, track_line(track));
    }

    let mut flags = Vec::new();
    if status.shuffle {
        flags.push("🔀 shuffle");
    }
    if status.loop_single {
        flags.push("🔂 track loop");
    }
    if status.loop_all {
        flags.push("🔁 queue loop");
    }

    let _ = write!(
        out,
        "Page {}/{} · {} tracks · {}",
        page.current_page,
        page.total_pages,
        page.total_items,
        format_duration(status.queued_duration)
    );
    if !flags.is_empty() {
        let _ = write!(out, " · {}", flags.join(", "));
    }
    out
}
