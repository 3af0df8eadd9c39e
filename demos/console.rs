use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use qsc_control::{gain_control, mute_control, DeviceInfo, QscClient};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap},
    Frame, Terminal,
};
use std::fs::File;
use std::io;
use std::sync::Mutex;

const VOLUME_STEP: u32 = 5;

/// Last known state of one block
#[derive(Default)]
struct BlockState {
    volume: Option<u32>,
    mute: Option<bool>,
}

struct App {
    client: QscClient,
    blocks: Vec<String>,
    states: Vec<BlockState>,
    selected: usize,
    info: Option<DeviceInfo>,
    status_message: String,
}

impl App {
    fn new(client: QscClient, blocks: Vec<String>) -> Self {
        let states = blocks.iter().map(|_| BlockState::default()).collect();
        Self {
            client,
            blocks,
            states,
            selected: 0,
            info: None,
            status_message: "Connecting...".to_string(),
        }
    }

    fn select_next(&mut self) {
        if !self.blocks.is_empty() {
            self.selected = (self.selected + 1) % self.blocks.len();
        }
    }

    fn select_previous(&mut self) {
        if !self.blocks.is_empty() {
            self.selected = self.selected.checked_sub(1).unwrap_or(self.blocks.len() - 1);
        }
    }

    async fn refresh(&mut self) {
        let mut failures = Vec::new();

        for (block, state) in self.blocks.iter().zip(self.states.iter_mut()) {
            match self.client.volume(&gain_control(block)).await {
                Ok(volume) => state.volume = Some(volume),
                Err(e) => {
                    state.volume = None;
                    failures.push(format!("{}: {}", gain_control(block), e));
                }
            }
            match self.client.mute(&mute_control(block)).await {
                Ok(mute) => state.mute = Some(mute),
                Err(e) => {
                    state.mute = None;
                    failures.push(format!("{}: {}", mute_control(block), e));
                }
            }
        }

        self.status_message = if failures.is_empty() {
            format!("Refreshed {} block(s)", self.blocks.len())
        } else {
            failures.join("; ")
        };
    }

    async fn load_info(&mut self) {
        match self.client.info().await {
            Ok(info) => {
                self.status_message = format!("{} is {}", info.hostname, info.state);
                self.info = Some(info);
            }
            Err(e) => self.status_message = format!("Failed to get info: {}", e),
        }
    }

    async fn adjust_volume(&mut self, up: bool) {
        let Some(block) = self.blocks.get(self.selected) else {
            return;
        };
        let current = self.states[self.selected].volume.unwrap_or(0);
        let volume = if up {
            (current + VOLUME_STEP).min(100)
        } else {
            current.saturating_sub(VOLUME_STEP)
        };

        match self.client.set_volume(&gain_control(block), volume).await {
            Ok(()) => {
                self.states[self.selected].volume = Some(volume);
                self.status_message = format!("{} volume: {}%", block, volume);
            }
            Err(e) => self.status_message = format!("Failed to set volume: {}", e),
        }
    }

    async fn toggle_mute(&mut self) {
        let Some(block) = self.blocks.get(self.selected) else {
            return;
        };
        let mute = !self.states[self.selected].mute.unwrap_or(false);

        match self.client.set_mute(&mute_control(block), mute).await {
            Ok(()) => {
                self.states[self.selected].mute = Some(mute);
                self.status_message = format!("{} mute: {}", block, if mute { "ON" } else { "OFF" });
            }
            Err(e) => self.status_message = format!("Failed to set mute: {}", e),
        }
    }
}

fn ui(f: &mut Frame, app: &App) {
    let outer_chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([Constraint::Min(0), Constraint::Length(3)])
        .split(f.size());

    let inner_chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(outer_chunks[0]);

    render_blocks(f, app, inner_chunks[0]);
    render_info(f, app, inner_chunks[1]);
    render_status(f, app, outer_chunks[1]);
}

fn render_blocks(f: &mut Frame, app: &App, area: Rect) {
    let block = Block::default()
        .title(format!(
            " {} (j/k select, +/- vol, m mute, r refresh, i info, q quit) ",
            app.client.address()
        ))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Green));

    let items: Vec<ListItem> = app
        .blocks
        .iter()
        .zip(&app.states)
        .map(|(name, state)| {
            let volume = state
                .volume
                .map_or_else(|| "--".to_string(), |v| format!("{}%", v));
            let (mute, mute_style) = match state.mute {
                Some(true) => ("ON", Style::default().fg(Color::Red).add_modifier(Modifier::BOLD)),
                Some(false) => ("OFF", Style::default().fg(Color::Green)),
                None => ("--", Style::default().fg(Color::Gray)),
            };

            ListItem::new(vec![
                Line::from(Span::styled(
                    name.as_str(),
                    Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
                )),
                Line::from(vec![
                    Span::raw("  Volume: "),
                    Span::styled(volume, Style::default().fg(Color::Cyan)),
                    Span::raw("  Mute: "),
                    Span::styled(mute, mute_style),
                ]),
                Line::from(""),
            ])
        })
        .collect();

    let mut state = ListState::default();
    state.select(Some(app.selected));

    let list = List::new(items)
        .block(block)
        .highlight_style(
            Style::default()
                .bg(Color::DarkGray)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol(">> ");

    f.render_stateful_widget(list, area, &mut state);
}

fn render_info(f: &mut Frame, app: &App, area: Rect) {
    let block = Block::default()
        .title(" Device Info ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Magenta));

    let Some(info) = &app.info else {
        let text = Paragraph::new("Press i to load device info")
            .block(block)
            .wrap(Wrap { trim: true });
        f.render_widget(text, area);
        return;
    };

    let field = |label: &'static str, value: String| {
        Line::from(vec![
            Span::styled(label, Style::default().fg(Color::Yellow)),
            Span::raw(value),
        ])
    };

    let mut lines = vec![
        field("Hostname: ", info.hostname.clone()),
        field("Model: ", info.model_name.clone()),
        field("IP: ", info.ip_address.clone()),
        field("State: ", info.state.clone()),
        field("Status: ", format!("{} ({})", info.status, info.status_code)),
        Line::from(""),
    ];

    // Pretty-print the raw status response
    let raw = serde_json::from_str::<serde_json::Value>(&info.raw_state)
        .and_then(|value| serde_json::to_string_pretty(&value))
        .unwrap_or_else(|_| info.raw_state.clone());
    lines.extend(raw.lines().map(|line| Line::from(line.to_string())));

    let text = Paragraph::new(lines).block(block);
    f.render_widget(text, area);
}

fn render_status(f: &mut Frame, app: &App, area: Rect) {
    let block = Block::default()
        .title(" Status ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Gray));

    let text = Paragraph::new(app.status_message.clone())
        .block(block)
        .wrap(Wrap { trim: true });

    f.render_widget(text, area);
}

/// Send logs to the file named by `QSC_CONSOLE_LOG`, if set
fn init_logging() -> io::Result<()> {
    let Ok(path) = std::env::var("QSC_CONSOLE_LOG") else {
        return Ok(());
    };

    tracing_subscriber::fmt()
        .with_writer(Mutex::new(File::create(path)?))
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let Some(address) = args.next() else {
        eprintln!("usage: console <address> [block]...");
        std::process::exit(2);
    };
    let mut blocks: Vec<String> = args.collect();
    if blocks.is_empty() {
        blocks.push("Main".to_string());
    }

    init_logging()?;

    let mut app = App::new(QscClient::new(address), blocks);

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, &mut app).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        println!("Error: {}", err);
    }

    Ok(())
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
) -> Result<(), Box<dyn std::error::Error>> {
    terminal.draw(|f| ui(f, app))?;
    app.refresh().await;

    loop {
        terminal.draw(|f| ui(f, app))?;

        if event::poll(std::time::Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                        KeyCode::Char('j') | KeyCode::Down => app.select_next(),
                        KeyCode::Char('k') | KeyCode::Up => app.select_previous(),
                        KeyCode::Char('+') | KeyCode::Char('=') => app.adjust_volume(true).await,
                        KeyCode::Char('-') | KeyCode::Char('_') => app.adjust_volume(false).await,
                        KeyCode::Char('m') => app.toggle_mute().await,
                        KeyCode::Char('r') => app.refresh().await,
                        KeyCode::Char('i') => app.load_info().await,
                        _ => {}
                    }
                }
            }
        }
    }
}
