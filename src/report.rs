//! Solution Reporter (spec.md §4.5): renders a `Solution` as a plain-text
//! timetable, one block per worker, plus a fleet summary. Pure formatting —
//! no I/O, no recomputation of anything the solver already decided.

use crate::domain::{Route, Shift, Solution};

fn format_hms(total_seconds: i64) -> String {
    let sign = if total_seconds < 0 { "-" } else { "" };
    let s = total_seconds.unsigned_abs();
    format!("{sign}{:02}:{:02}:{:02}", s / 3600, (s % 3600) / 60, s % 60)
}

fn render_worker_block(out: &mut String, route: &Route) {
    out.push_str(&format!("Worker {}\n", route.worker_id));
    if !route.is_active() {
        out.push_str("  (no visits assigned)\n\n");
        return;
    }
    out.push_str("  Visit        Arrival   Start     End       Departure\n");
    for stop in &route.stops {
        out.push_str(&format!(
            "  {:<12} {:<9} {:<9} {:<9} {:<9}\n",
            stop.visit_id,
            format_hms(stop.arrival_s),
            format_hms(stop.service_start_s),
            format_hms(stop.service_end_s),
            format_hms(stop.departure_s),
        ));
    }
    out.push('\n');
}

#[derive(Debug, Clone, Copy, Default)]
struct FleetTotals {
    travel_time_s: i64,
    wait_time_s: i64,
    service_time_s: i64,
    distance_m: i64,
}

fn accumulate(route: &Route) -> FleetTotals {
    let mut totals = FleetTotals::default();
    let mut prev_departure = route.route_start_s;
    for stop in &route.stops {
        totals.service_time_s += stop.service_end_s - stop.service_start_s;
        totals.distance_m += stop.leg_distance_m;
        totals.wait_time_s += (stop.service_start_s - stop.arrival_s).max(0);
        totals.travel_time_s += stop.arrival_s - prev_departure;
        prev_departure = stop.departure_s;
    }
    totals.distance_m += route.return_distance_m;
    totals.travel_time_s += route.return_travel_s;
    totals
}

fn render_fleet_summary(out: &mut String, solution: &Solution) {
    let active = solution.active_worker_count();
    let mut totals = FleetTotals::default();
    for route in &solution.routes {
        if route.is_active() {
            let t = accumulate(route);
            totals.travel_time_s += t.travel_time_s;
            totals.wait_time_s += t.wait_time_s;
            totals.service_time_s += t.service_time_s;
            totals.distance_m += t.distance_m;
        }
    }
    let total_time = totals.travel_time_s + totals.wait_time_s + totals.service_time_s;
    let avg_speed_kph = if totals.travel_time_s > 0 {
        (totals.distance_m as f64 / 1000.0) / (totals.travel_time_s as f64 / 3600.0)
    } else {
        0.0
    };

    out.push_str("Fleet summary\n");
    out.push_str(&format!("  Active workers:     {active}\n"));
    out.push_str(&format!("  Dropped visits:     {}\n", solution.dropped.len()));
    out.push_str(&format!("  Total route time:   {}\n", format_hms(total_time)));
    out.push_str(&format!("  Travel time:        {}\n", format_hms(totals.travel_time_s)));
    out.push_str(&format!("  Wait time:          {}\n", format_hms(totals.wait_time_s)));
    out.push_str(&format!("  Service time:       {}\n", format_hms(totals.service_time_s)));
    out.push_str(&format!("  Average speed:      {avg_speed_kph:.1} kph\n"));

    if !solution.dropped.is_empty() {
        out.push_str("\nDropped visits\n");
        for dropped in &solution.dropped {
            let tokens: Vec<String> = dropped.uncovered.iter().map(|t| t.to_string()).collect();
            out.push_str(&format!(
                "  {:<12} reason={:<12?} penalty={:<6} uncovered=[{}]\n",
                dropped.visit_id,
                dropped.reason,
                dropped.penalty,
                tokens.join(", ")
            ));
        }
    }
}

/// Renders a full human-readable report: per-worker timetables followed by
/// the fleet summary (spec.md §4.5). `shift` is accepted for symmetry with
/// the rest of the core's signatures and future shift-window annotations;
/// the current rendering is entirely driven by the solved timings.
pub fn render_text(solution: &Solution, _shift: &Shift) -> String {
    let mut out = String::new();
    for route in &solution.routes {
        render_worker_block(&mut out, route);
    }
    render_fleet_summary(&mut out, solution);
    out
}
