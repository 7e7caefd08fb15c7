use std::path::Path;

/// Languages the harness can build without a user-supplied Dockerfile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Python,
    Node,
    Go,
    Rust,
    Java,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Node => "node",
            Language::Go => "go",
            Language::Rust => "rust",
            Language::Java => "java",
        }
    }
}

/// Detect the submission language from its build manifest.
pub fn detect_language(submission_path: &Path) -> Option<Language> {
    let has = |name: &str| submission_path.join(name).exists();

    if has("package.json") {
        Some(Language::Node)
    } else if has("requirements.txt") || has("setup.py") || has("pyproject.toml") {
        Some(Language::Python)
    } else if has("go.mod") {
        Some(Language::Go)
    } else if has("Cargo.toml") {
        Some(Language::Rust)
    } else if has("pom.xml") || has("build.gradle") {
        Some(Language::Java)
    } else {
        None
    }
}

/// Minimal per-language Dockerfile: install dependencies, expose port 3000,
/// honor the PORT convention.
pub fn dockerfile_for(language: Language) -> String {
    match language {
        Language::Python => "\
FROM python:3.11-slim
WORKDIR /app
COPY requirements.txt* setup.py* pyproject.toml* ./
RUN if [ -f requirements.txt ]; then pip install --no-cache-dir -r requirements.txt; \\
    elif [ -f setup.py ]; then pip install --no-cache-dir .; \\
    elif [ -f pyproject.toml ]; then pip install --no-cache-dir .; fi
COPY . .
ENV PORT=3000
EXPOSE 3000
CMD [\"python\", \"main.py\"]
"
        .to_string(),
        Language::Node => "\
FROM node:20-slim
WORKDIR /app
COPY package*.json ./
RUN npm install --omit=dev
COPY . .
ENV PORT=3000
EXPOSE 3000
CMD [\"npm\", \"start\"]
"
        .to_string(),
        Language::Go => "\
FROM golang:1.22-alpine AS build
WORKDIR /src
COPY go.mod go.sum* ./
RUN go mod download
COPY . .
RUN go build -o /app/server .

FROM alpine:3.19
COPY --from=build /app/server /app/server
ENV PORT=3000
EXPOSE 3000
CMD [\"/app/server\"]
"
        .to_string(),
        Language::Rust => "\
FROM rust:1.77-slim AS build
WORKDIR /src
COPY . .
RUN cargo build --release

FROM debian:bookworm-slim
COPY --from=build /src/target/release /app
ENV PORT=3000
EXPOSE 3000
CMD [\"sh\", \"-c\", \"/app/$(ls /app | head -1)\"]
"
        .to_string(),
        Language::Java => "\
FROM maven:3.9-eclipse-temurin-21 AS build
WORKDIR /src
COPY . .
RUN if [ -f pom.xml ]; then mvn -q package -DskipTests; else ./gradlew build -x test; fi

FROM eclipse-temurin:21-jre
COPY --from=build /src/target/*.jar /app/app.jar
ENV PORT=3000
EXPOSE 3000
CMD [\"java\", \"-jar\", \"/app/app.jar\"]
"
        .to_string(),
    }
}

/// Default start command for the local-process backend.
pub fn start_command_for(language: Language) -> &'static str {
    match language {
        Language::Python => "python main.py",
        Language::Node => "npm start",
        Language::Go => "go run .",
        Language::Rust => "cargo run --release",
        Language::Java => "mvn -q exec:java",
    }
}

/// Install step run before launching a local-process deployment.
pub fn install_command_for(language: Language) -> Option<&'static str> {
    match language {
        Language::Python => Some("pip install --no-cache-dir -r requirements.txt"),
        Language::Node => Some("npm install"),
        Language::Go => Some("go mod download"),
        Language::Rust => Some("cargo build --release"),
        Language::Java => Some("mvn -q package -DskipTests"),
    }
}
