use iocraft::prelude::*;
use tokio::sync::watch;

use chunkup::PartRange;

#[derive(Default, Props)]
pub struct ProgressBarProps {
    pub title: String,
    pub progress: Option<watch::Receiver<f32>>,
}

#[component]
pub fn ProgressBar(props: &ProgressBarProps, mut hooks: Hooks) -> impl Into<AnyElement<'static>> {
    let mut progress = hooks.use_state(|| 0.0f32);
    let receiver = props.progress.clone();

    hooks.use_future(async move {
        if let Some(mut receiver) = receiver {
            while receiver.changed().await.is_ok() {
                let value = *receiver.borrow_and_update();
                progress.set(value.clamp(0.0, 100.0));
            }
        }
    });

    let value = progress.get();

    element! {
        View(flex_direction: FlexDirection::Column) {
            Text(weight: Weight::Bold, content: &props.title)
            View(flex_direction: FlexDirection::Row) {
                View(border_style: BorderStyle::Round, border_color: Color::Blue, width: 52) {
                    View(width: Percent(value), height: 1, background_color: Color::Green)
                }
                View(padding_left: 1, padding_top: 1) {
                    Text(content: format!("{:>3.0}%", value))
                }
            }
        }
    }
}

#[derive(Default, Props)]
pub struct PlanTableProps {
    pub parts: Vec<PartRange>,
}

#[component]
pub fn PlanTable(props: &PlanTableProps) -> impl Into<AnyElement<'static>> {
    element! {
        View(flex_direction: FlexDirection::Column) {
            View(flex_direction: FlexDirection::Row) {
                View(width: 8) { Text(weight: Weight::Bold, content: "Part") }
                View(width: 16) { Text(weight: Weight::Bold, content: "Start") }
                View(width: 16) { Text(weight: Weight::Bold, content: "End") }
                View(width: 14) { Text(weight: Weight::Bold, content: "Size") }
            }
            #(props.parts.iter().map(|part| {
                element! {
                    View(flex_direction: FlexDirection::Row) {
                        View(width: 8) { Text(content: part.part_number.to_string()) }
                        View(width: 16) { Text(content: part.start.to_string()) }
                        View(width: 16) { Text(content: part.end.to_string()) }
                        View(width: 14) { Text(content: format_size(part.len())) }
                    }
                }
            }))
        }
    }
}

#[derive(Default, Props)]
pub struct MessageProps {
    pub message: String,
}

#[component]
pub fn ErrorMessage(props: &MessageProps) -> impl Into<AnyElement<'static>> {
    element! {
        View(flex_direction: FlexDirection::Row) {
            Text(color: Color::Red, content: "▲ ")
            Text(content: &props.message)
        }
    }
}

#[component]
pub fn SuccessMessage(props: &MessageProps) -> impl Into<AnyElement<'static>> {
    element! {
        View(flex_direction: FlexDirection::Row) {
            Text(color: Color::Green, content: "◆ ")
            Text(content: &props.message)
        }
    }
}

#[derive(Default, Props)]
pub struct InputPromptProps {
    pub prompt: String,
    pub default: Option<String>,
    pub description: Option<String>,
}

#[component]
pub fn InputPrompt(props: &InputPromptProps) -> impl Into<AnyElement<'static>> {
    let label = match &props.default {
        Some(default) => format!("{} [{}]", props.prompt, default),
        None => props.prompt.clone(),
    };

    element! {
        View(flex_direction: FlexDirection::Column, margin_top: 1) {
            Text(weight: Weight::Bold, content: label)
            #(props.description.as_ref().map(|description| element! {
                Text(color: Color::DarkGrey, content: description.clone())
            }))
        }
    }
}

#[component]
pub fn ConfigHeader() -> impl Into<AnyElement<'static>> {
    element! {
        View(flex_direction: FlexDirection::Column) {
            View(background_color: Color::Blue) {
                Text(color: Color::White, content: " chunkup configuration ")
            }
            Text(content: "Press enter to keep the value shown in brackets.")
        }
    }
}

pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", value, UNITS[unit])
}
