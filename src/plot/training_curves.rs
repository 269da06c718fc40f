use std::ops::Range;

use plotters::prelude::*;

use crate::error::{NNError, Result};
use crate::history::TrainingHistory;

static COLORS: [RGBColor; 4] = [BLUE, RED, GREEN, MAGENTA];

/// Receiver of training curves. The trainer only calls it at epoch boundaries
/// and never reads anything back.
pub trait PlotSink {
    /// Adds or replaces the series named `id`.
    fn add_series(&mut self, id: &str, xs: &[f64], ys: &[f64], label: &str);

    fn render(&mut self, x_range: Range<f64>, y_range: Range<f64>, path: &str) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub id: String,
    pub label: String,
    pub points: Vec<(f64, f64)>,
}

/// [`PlotSink`] drawing line charts to a bitmap with plotters.
#[derive(Debug, Clone, Default)]
pub struct ChartSink {
    caption: String,
    series: Vec<Series>,
}

impl ChartSink {
    pub fn new(caption: &str) -> Self {
        Self {
            caption: caption.to_string(),
            series: Vec::new(),
        }
    }

    pub fn series(&self) -> &[Series] {
        &self.series
    }

    fn draw(&self, x_range: Range<f64>, y_range: Range<f64>, path: &str) -> std::result::Result<(), Box<dyn std::error::Error>> {
        let root = BitMapBackend::new(path, (800, 600)).into_drawing_area();
        root.fill(&WHITE)?;

        let mut chart = ChartBuilder::on(&root)
            .caption(&self.caption, ("sans-serif", 30).into_font())
            .margin(5)
            .x_label_area_size(50)
            .y_label_area_size(60)
            .build_cartesian_2d(x_range, y_range)?;

        chart.configure_mesh().x_desc("Epoch").draw()?;

        for (i, series) in self.series.iter().enumerate() {
            let color = &COLORS[i % COLORS.len()];
            chart
                .draw_series(LineSeries::new(series.points.iter().copied(), color))?
                .label(series.label.as_str())
                .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
        }

        chart
            .configure_series_labels()
            .background_style(&WHITE.mix(0.8))
            .border_style(&BLACK)
            .draw()?;

        root.present()?;
        Ok(())
    }
}

impl PlotSink for ChartSink {
    fn add_series(&mut self, id: &str, xs: &[f64], ys: &[f64], label: &str) {
        let series = Series {
            id: id.to_string(),
            label: label.to_string(),
            points: xs.iter().copied().zip(ys.iter().copied()).collect(),
        };
        match self.series.iter_mut().find(|s| s.id == id) {
            Some(existing) => *existing = series,
            None => self.series.push(series),
        }
    }

    fn render(&mut self, x_range: Range<f64>, y_range: Range<f64>, path: &str) -> Result<()> {
        self.draw(x_range, y_range, path)
            .map_err(|e| NNError::PlotError(e.to_string()))?;
        tracing::info!(path, "training curves saved");
        Ok(())
    }
}

/// Pushes the accuracy and cost curves of `history` into `sink`.
pub fn push_history(history: &TrainingHistory, sink: &mut dyn PlotSink) {
    let xs = history.epoch_axis();
    sink.add_series("accuracy", &xs, &history.accuracies(), "Accuracy");
    sink.add_series("cost", &xs, &history.costs(), "Average cost");
}

/// Axis ranges covering every curve of `history`.
pub fn history_ranges(history: &TrainingHistory) -> (Range<f64>, Range<f64>) {
    let epochs = history.len().max(1) as f64;
    let y_max = history
        .costs()
        .into_iter()
        .chain(history.accuracies())
        .filter(|v| v.is_finite())
        .fold(1.0_f64, f64::max);
    (0.0..epochs, 0.0..y_max * 1.05)
}
